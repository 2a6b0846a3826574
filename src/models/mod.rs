pub mod company;
pub mod onboarding;
pub mod role;

pub use company::ActiveCompany;
pub use onboarding::OnboardingProgress;
pub use role::{ClassifiedRole, UserType};
