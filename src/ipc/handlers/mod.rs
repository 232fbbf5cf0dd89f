pub mod accounts;
pub mod analytics;
pub mod backup;
pub mod core;
pub mod curriculum;
pub mod enrollment;
pub mod grades;
pub mod setup;
