pub mod health;
pub mod mattermost;
pub mod rbmq;
