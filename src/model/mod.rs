pub mod car;
pub mod notification;
pub mod page;
pub mod payment;
pub mod rental;
pub mod user;
