mod resume;
mod store;
mod types;

pub use resume::{ResumeController, ResumeOutcome, ResumeView};
pub use store::{CheckoutStore, SessionError, SessionSettings};
pub use types::{CheckoutSession, CheckoutStatus, Location, PaymentDetails, SessionPatch};
