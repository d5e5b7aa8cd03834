pub mod deal;
pub mod deal_activity;
pub mod deal_note;
pub mod deal_status_history;
pub mod subscriber;
