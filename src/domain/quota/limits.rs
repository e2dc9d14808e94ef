use super::model::{PlanType, ServiceType};

/// Limit reported for plans that are effectively unlimited
pub const UNLIMITED_SENTINEL: i32 = 9999;

/// Static (plan, service) limit table
pub fn limit_for(plan: PlanType, service: ServiceType) -> i32 {
    match (plan, service) {
        (PlanType::Admin, _) => UNLIMITED_SENTINEL,

        (PlanType::Basic, _) => 1,

        (PlanType::Standard, ServiceType::ImageGenerate) => 80,
        (PlanType::Standard, ServiceType::VideoGenerate) => 20,
        (PlanType::Standard, ServiceType::Productivity) => 120,

        (PlanType::Pro, ServiceType::ImageGenerate) => 180,
        (PlanType::Pro, ServiceType::VideoGenerate) => 40,
        (PlanType::Pro, ServiceType::Productivity) => 250,
    }
}
