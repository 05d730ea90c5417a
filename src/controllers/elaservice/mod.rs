pub mod controller;

pub use controller::{run, sync_handler, Context, ElaServiceController};

pub mod reconcilers;
