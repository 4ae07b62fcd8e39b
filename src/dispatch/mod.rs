pub mod clock;
pub mod dispatch_loop;
pub mod ledger;
