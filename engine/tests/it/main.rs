mod helpers;
mod ledger;
mod scenarios;
