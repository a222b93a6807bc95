//! Hard input limits. Anything beyond these is rejected before it reaches the engine.

/// Custom fields accepted per booking.
pub const MAX_FIELDS_PER_BOOKING: usize = 256;

/// Length of a single custom field key, in bytes.
pub const MAX_FIELD_KEY_LEN: usize = 256;

/// Length of a single textual field value, in bytes.
pub const MAX_FIELD_TEXT_LEN: usize = 4096;

/// Bookings scanned in one scope aggregation.
pub const MAX_BOOKINGS_PER_SCOPE: usize = 10_000;

/// Enforced event ids accepted in configuration.
pub const MAX_LIMITED_EVENTS: usize = 1024;

/// Length of the field matching token.
pub const MAX_FIELD_TOKEN_LEN: usize = 128;

/// Length of one hook protocol request line, in bytes.
pub const MAX_REQUEST_LINE_LEN: usize = 1024 * 1024;
