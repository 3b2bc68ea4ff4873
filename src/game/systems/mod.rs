pub mod movement;
pub mod physics;
pub mod rules;
pub mod skill;
pub mod spawner;
