pub mod cdp;
pub mod page;

pub use cdp::LaunchOptions;
pub use page::CdpPage;
