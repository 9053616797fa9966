pub mod changes;
pub mod curriculum;
pub mod edit_links;
pub mod leaderboard;
pub mod progress;
pub mod quick_links;
pub mod subjects;
