pub mod announcements;
pub mod assignments;
pub mod attendance;
pub mod auth;
pub mod behavior;
pub mod grades;
pub mod meetings;
pub mod messages;
pub mod students;
pub mod users;
