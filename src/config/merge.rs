//! Config overlay merging.
//!
//! Applied exactly once, at orchestrator entry, before plugin
//! initialization: the per-request config overlays the client's base
//! config, shallow per slice. Header maps merge additively with the
//! per-request side winning; every other field is replace-if-set.

use super::CallOptions;

/// Disables the shallow merge for the named slice so the caller's
/// value is taken wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipAutoMerge {
    /// Merge both slices (the default).
    #[default]
    None,
    /// Take the request slice (method/headers/body/signal) wholesale
    /// from the per-request config.
    Request,
    /// Take the extra-options slice wholesale from the per-request
    /// config.
    Options,
    /// Take both slices wholesale.
    All,
}

pub(crate) fn merge_options(base: &CallOptions, request: &CallOptions) -> CallOptions {
    let skip = request.skip_auto_merge_for.unwrap_or_default();

    let mut merged = match skip {
        SkipAutoMerge::All => return request.clone(),
        SkipAutoMerge::Options => request.clone(),
        SkipAutoMerge::None | SkipAutoMerge::Request => {
            let mut merged = request.clone();
            merged.fill_from(base);
            merged
        }
    };

    match skip {
        SkipAutoMerge::Request | SkipAutoMerge::All => {
            merged.request = request.request.clone();
        }
        SkipAutoMerge::Options => {
            // Extra options came wholesale from the request; the
            // request slice still merges.
            let slice = &mut merged.request;
            for (k, v) in &base.request.headers {
                slice.headers.entry(k.clone()).or_insert_with(|| v.clone());
            }
            if slice.method.is_none() {
                slice.method = base.request.method.clone();
            }
            if slice.body.is_none() {
                slice.body = base.request.body.clone();
            }
            if slice.signal.is_none() {
                slice.signal = base.request.signal.clone();
            }
        }
        SkipAutoMerge::None => {}
    }

    merged
}
