//! Domain models shared by the daemon, its collaborators and the control client.

pub mod clock;
