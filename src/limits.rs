/// Longest accepted text field (staff, department, subject, room, ...), in bytes.
pub const MAX_FIELD_LEN: usize = 256;

/// Bookings a single tenant may hold.
pub const MAX_BOOKINGS_PER_TENANT: usize = 100_000;

/// Rows in one multi-row INSERT.
pub const MAX_BATCH_SIZE: usize = 1_000;

pub const MAX_TENANTS: usize = 1_024;

pub const MAX_TENANT_NAME_LEN: usize = 256;
