//! Channel identifiers multiplexed over a committee's peer connections.

/// Channel identifier on a peer connection.
pub type ChannelId = u8;

/// Channel identifiers for the consensus reactor.
pub mod channels {
    use super::ChannelId;

    /// Round state announcements.
    pub const STATE: ChannelId = 0x20;

    /// Proposals and block parts.
    pub const DATA: ChannelId = 0x21;

    /// Prevotes and precommits.
    pub const VOTE: ChannelId = 0x22;

    /// Vote set bit arrays.
    pub const VOTE_SET_BITS: ChannelId = 0x23;

    /// All consensus channels, in announcement order.
    pub const CONSENSUS: [ChannelId; 4] = [STATE, DATA, VOTE, VOTE_SET_BITS];
}
