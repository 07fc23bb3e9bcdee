//! Event type namespace shared by producers and consumers.
//!
//! These strings are the only coupling between the write side and the read side.
//! Changing one is a breaking wire change.

pub const AGGREGATE_ORGANIZATION: &str = "organization";
pub const AGGREGATE_EMPLOYEE: &str = "employee";

pub const ORGANIZATION_CREATED: &str = "organization.created";
pub const ORGANIZATION_UPDATED: &str = "organization.updated";
pub const ORGANIZATION_DELETED: &str = "organization.deleted";
pub const ORGANIZATION_MOVED: &str = "organization.moved";
pub const ORGANIZATION_RESTRUCTURED: &str = "organization.restructured";
pub const ORGANIZATION_ACTIVATED: &str = "organization.activated";
pub const ORGANIZATION_DEACTIVATED: &str = "organization.deactivated";

pub const EMPLOYEE_CREATED: &str = "employee.created";
pub const EMPLOYEE_HIRED: &str = "employee.hired";
pub const EMPLOYEE_UPDATED: &str = "employee.updated";
pub const EMPLOYEE_PHONE_UPDATED: &str = "employee.phone_updated";
pub const EMPLOYEE_ACTIVATED: &str = "employee.activated";
pub const EMPLOYEE_DEACTIVATED: &str = "employee.deactivated";
pub const EMPLOYEE_TERMINATED: &str = "employee.terminated";
pub const EMPLOYEE_DELETED: &str = "employee.deleted";

pub const ORGANIZATION_EVENT_TYPES: &[&str] = &[
    ORGANIZATION_CREATED,
    ORGANIZATION_UPDATED,
    ORGANIZATION_DELETED,
    ORGANIZATION_MOVED,
    ORGANIZATION_RESTRUCTURED,
    ORGANIZATION_ACTIVATED,
    ORGANIZATION_DEACTIVATED,
];

pub const EMPLOYEE_EVENT_TYPES: &[&str] = &[
    EMPLOYEE_CREATED,
    EMPLOYEE_HIRED,
    EMPLOYEE_UPDATED,
    EMPLOYEE_PHONE_UPDATED,
    EMPLOYEE_ACTIVATED,
    EMPLOYEE_DEACTIVATED,
    EMPLOYEE_TERMINATED,
    EMPLOYEE_DELETED,
];
