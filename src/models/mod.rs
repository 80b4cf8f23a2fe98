pub mod appointment;
pub mod customer;
pub mod provider;
pub mod service;
pub mod session;

pub use appointment::{
    Appointment, AppointmentSource, AppointmentStatus, CancelOutcome, NewAppointment,
};
pub use customer::Customer;
pub use provider::{Provider, WorkingHours};
pub use service::{format_price, Service, ServiceSnapshot};
pub use session::{
    CancelCandidate, CancelCandidates, PendingConfirmation, Session, SessionState, SessionStep,
    TimeSelection,
};
