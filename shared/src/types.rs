/// Per-link packet sequence number. Only the low 31 bits are used; the top
/// bit of the wire field carries the new-generation hint.
pub type SequenceNumber = u32;
/// Correlates a response packet with the request that caused it.
pub type RequestId = u32;
/// Logical milliseconds, advanced once per server tick.
pub type ServerTime = u64;
/// Number of exchange round-trip pings observed by a server.
pub type PingCount = u64;
