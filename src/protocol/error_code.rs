//! Fixed enumeration of protocol error conditions.
//!
//! These codes travel in the `ec` payload field of error-response packets,
//! as a 16-bit value whose numbering is fixed by the emulated protocol.

/// Named error conditions understood by compatible clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum SfsErrorCode {
    InvalidApi = 0,
    InvalidZone = 1,
    InvalidUsername = 2,
    InvalidPassword = 3,
    UserBanned = 4,
    ZoneFull = 5,
    AlreadyLoggedIntoZone = 6,
    ServerFull = 7,
    ZoneInactive = 8,
    UsernameInappropriate = 9,
    GuestDeniedInZone = 10,
    IpBanned = 11,
    RoomExists = 12,
    GroupUnavailable = 13,
    BadRoomNameLength = 14,
    InappropriateRoomName = 15,
    TooManyRoomsInZone = 16,
    ExceededRoomSessionLimit = 17,
    RoomCreationFailed = 18,
    RoomAlreadyJoined = 19,
    RoomFull = 20,
    InvalidRoomPassword = 21,
    RoomNotFound = 22,
    RoomLocked = 23,
    GroupAlreadySubscribed = 24,
    GroupNotFound = 25,
    GroupNotSubscribed = 26,
    Generic = 28,
    RoomRenameDenied = 29,
    RoomPasswordChangeDenied = 30,
    RoomCapacityChangeDenied = 31,
    SwitchFailedNoPlayerSlotsAvailable = 32,
    SwitchFailedNoSpectatorSlotsAvailable = 33,
    SwitchFailedNonGameRoom = 34,
    SwitchFailedNotJoinedInRoom = 35,
    BuddyListError = 36,
    BuddyListFull = 37,
    TooManyBuddyVariables = 39,
    GameAccessDenied = 40,
    QuickJoinFailedNoMatchingRooms = 41,
    InviteReplyInvalid = 42,
}

impl SfsErrorCode {
    /// Wire value carried in the `ec` field.
    pub fn to_short(self) -> i16 {
        self as i16
    }

    /// Maps a wire value back to a named condition.
    pub fn from_short(value: i16) -> Option<Self> {
        use SfsErrorCode::*;
        let code = match value {
            0 => InvalidApi,
            1 => InvalidZone,
            2 => InvalidUsername,
            3 => InvalidPassword,
            4 => UserBanned,
            5 => ZoneFull,
            6 => AlreadyLoggedIntoZone,
            7 => ServerFull,
            8 => ZoneInactive,
            9 => UsernameInappropriate,
            10 => GuestDeniedInZone,
            11 => IpBanned,
            12 => RoomExists,
            13 => GroupUnavailable,
            14 => BadRoomNameLength,
            15 => InappropriateRoomName,
            16 => TooManyRoomsInZone,
            17 => ExceededRoomSessionLimit,
            18 => RoomCreationFailed,
            19 => RoomAlreadyJoined,
            20 => RoomFull,
            21 => InvalidRoomPassword,
            22 => RoomNotFound,
            23 => RoomLocked,
            24 => GroupAlreadySubscribed,
            25 => GroupNotFound,
            26 => GroupNotSubscribed,
            28 => Generic,
            29 => RoomRenameDenied,
            30 => RoomPasswordChangeDenied,
            31 => RoomCapacityChangeDenied,
            32 => SwitchFailedNoPlayerSlotsAvailable,
            33 => SwitchFailedNoSpectatorSlotsAvailable,
            34 => SwitchFailedNonGameRoom,
            35 => SwitchFailedNotJoinedInRoom,
            36 => BuddyListError,
            37 => BuddyListFull,
            39 => TooManyBuddyVariables,
            40 => GameAccessDenied,
            41 => QuickJoinFailedNoMatchingRooms,
            42 => InviteReplyInvalid,
            _ => return None,
        };
        Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_round_trip() {
        for value in 0..=42i16 {
            if let Some(code) = SfsErrorCode::from_short(value) {
                assert_eq!(code.to_short(), value);
            }
        }
    }

    #[test]
    fn gaps_are_unmapped() {
        assert_eq!(SfsErrorCode::from_short(27), None);
        assert_eq!(SfsErrorCode::from_short(38), None);
        assert_eq!(SfsErrorCode::from_short(-1), None);
        assert_eq!(SfsErrorCode::from_short(100), None);
    }

    #[test]
    fn known_codes_match_protocol_numbering() {
        assert_eq!(SfsErrorCode::RoomFull.to_short(), 20);
        assert_eq!(SfsErrorCode::InvalidRoomPassword.to_short(), 21);
        assert_eq!(SfsErrorCode::ZoneFull.to_short(), 5);
    }
}
