pub const MIB: u64 = 1024 * 1024;

/// Working buffer used to stream file bodies (256MB)
pub const CHUNK_SIZE: usize = 256 * 1024 * 1024;

/// Progress is reported after the byte counter passes the last checkpoint by this much (16MB)
pub const CHECKPOINT_INTERVAL: u64 = 16 * MIB;

/// Length of the per-file size prefix on the wire
pub const PREFIX_LEN: usize = 8;
