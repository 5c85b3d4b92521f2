pub mod constants;
pub mod url_utils;

pub use constants::*;
pub use url_utils::{extract_domain, is_valid_url, normalize_url};
