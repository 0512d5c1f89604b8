// Entity models
// Identity (UUID) persists, values change; registries own lookups and writes.

pub mod account;

pub use account::{
    AccountRegistry, AccountStatus, AccountType, AccountUpdate, CashAccount, NewAccount, TypeBalance,
};
