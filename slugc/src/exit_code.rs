pub(crate) const UNSPECIFIED_ERROR: i32 = 1;
pub(crate) const BUILD_FAILED: i32 = 3;
