pub mod admission;
pub mod claim;
pub mod patient;
pub mod reception;
pub mod record;
pub mod sequencer;
pub mod validation;

pub use admission::SlotAdmissionGuard;
pub use claim::AppointmentClaimer;
pub use patient::PatientResolver;
pub use reception::ReceptionService;
pub use record::RecordProvisioner;
pub use sequencer::QueueSequencer;
pub use validation::validate_request;
