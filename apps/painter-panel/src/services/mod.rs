pub mod account_service;
pub mod generation_service;
pub mod issuance_service;
pub mod ledger_service;
pub mod provider;

#[cfg(test)]
pub(crate) mod testing;
