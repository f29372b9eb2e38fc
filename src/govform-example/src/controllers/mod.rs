mod date_of_birth;
mod eligible;
mod name;
mod submit;

pub use date_of_birth::{DateOfBirthController, ADULT, CHILD};
pub use eligible::EligibleController;
pub use name::NameController;
pub use submit::SubmitController;
