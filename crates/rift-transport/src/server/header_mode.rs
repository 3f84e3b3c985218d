//! Process-wide response header mode.
//!
//! The mode is chosen once, by the first server that starts, and applies to
//! every connection served by this process afterwards. Later servers asking
//! for a different mode get the one already in force.

use hyper::server::conn::http1;
use once_cell::sync::OnceCell;
use tracing::{debug, info};

static HEADER_MODE: OnceCell<HeaderMode> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    /// Header names go out as stored (lowercase)
    Strict,
    /// Header names are title-cased, and request header case is preserved
    Compatible,
}

impl HeaderMode {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            HeaderMode::Strict
        } else {
            HeaderMode::Compatible
        }
    }

    pub(crate) fn apply(&self, builder: &mut http1::Builder) {
        match self {
            HeaderMode::Strict => {
                builder.title_case_headers(false);
            }
            HeaderMode::Compatible => {
                builder.title_case_headers(true).preserve_header_case(true);
            }
        }
    }
}

/// Fix the header mode for this process. Returns the mode in force, which
/// is `requested` only for the first caller.
pub fn init(requested: HeaderMode) -> HeaderMode {
    let mut first = false;
    let mode = *HEADER_MODE.get_or_init(|| {
        first = true;
        requested
    });
    if first {
        info!("Header mode set to {:?}", mode);
    } else if mode != requested {
        debug!(
            "Header mode {:?} requested but {:?} is already in force",
            requested, mode
        );
    }
    mode
}

/// Mode in force; `Strict` until [`init`] has run.
pub fn current() -> HeaderMode {
    HEADER_MODE.get().copied().unwrap_or(HeaderMode::Strict)
}
