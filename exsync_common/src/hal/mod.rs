//! Hardware abstraction contract.
//!
//! - [`driver`] - `DioDriver` trait and `HalError`
//! - [`types`] - `LineBundle`, `EdgeEvent`, `LineGroup`, `ChangeNotifier`

pub mod driver;
pub mod types;
