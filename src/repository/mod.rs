//! Repositories for users and accounts

mod account;
mod user;

pub use account::AccountRepository;
pub use user::UserRepository;
