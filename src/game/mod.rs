pub mod constants;
pub mod game_loop;
pub mod mailbox;
pub mod pool;
pub mod spatial;
pub mod stores;
pub mod systems;
