use crate::model::Ms;

/// 1970-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
/// A single booking or probe may not span more than a year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;
/// Upper bound on slots produced by one window query.
pub const MAX_WINDOW_SLOTS: usize = 10_000;

pub const MAX_REF_LEN: usize = 256;
pub const MAX_ZONE_LEN: usize = 64;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

/// Largest accepted request line on the wire adapter.
pub const MAX_LINE_BYTES: usize = 64 * 1024;
