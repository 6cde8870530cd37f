pub mod cdp_client;
pub mod chrome;
pub mod navigation;
pub mod session;

pub use cdp_client::{BrowserHandle, CdpPage, FrameRef, PageDriver, WaitCondition};
pub use chrome::ChromeController;
pub use navigation::{goto_with_retry, NavOptions};
pub use session::{BrowserSession, SessionParams};
