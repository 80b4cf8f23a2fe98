pub mod booking;
pub mod cancel_code;
pub mod conversation;
pub mod grammar;
pub mod messaging;
pub mod slots;
