//! Screen state machines. Each screen owns its state and reacts to the
//! service streams; the UI shell renders what they expose.

pub mod chat_room;
pub mod home;
pub mod login;
pub mod video_call;

pub use chat_room::{Alignment, ChatRoomScreen, MessageView};
pub use home::HomeScreen;
pub use login::LoginScreen;
pub use video_call::VideoCallScreen;
