pub mod payment_sweeper;
