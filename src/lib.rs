/*
    Ricart–Agrawala distributed mutual exclusion.

    N processes share one resource and coordinate only by messages. A process
    that wants the resource stamps a request with its Lamport clock and asks
    every other process; it enters once all of them have replied. A process
    postpones its reply while it is inside, or while its own pending request
    is older. Ties on the timestamp go to the lower process id.
*/

pub mod common;
pub mod config;
pub mod console;
pub mod mutex;
pub mod network;
pub mod simulator;
