//! Core functionalities.
mod actor;
mod builder;
mod env;
mod learner;
mod recurrent;
mod spec;
mod step;
mod trajectory;
pub use actor::{Actor, ActorOutput};
pub use builder::{AgentBuilder, AgentParts, NetworkFactory};
pub use env::Env;
pub use learner::{Learner, LearnerUpdate};
pub use recurrent::RecurrentState;
pub use spec::{ActionSpace, EnvSpec, ObsDtype, ObsSpec, TemporalContract};
pub use step::{Action, Extras, Observation, Step};
pub use trajectory::{Trajectory, TrajectoryStep};
