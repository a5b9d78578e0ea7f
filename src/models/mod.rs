pub mod event;
pub mod health;
pub mod mattermost;
pub mod retry;
pub mod routing;
