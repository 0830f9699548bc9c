use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Camera devices exist but opening a stream was refused. Recoverable by
    /// asking the user again.
    #[error("camera access denied")]
    PermissionDenied(#[source] anyhow::Error),

    /// No camera hardware is present. Terminal until the device topology
    /// changes.
    #[error("no camera device available")]
    DeviceUnavailable,

    /// Model asset staging or inference session construction failed. Raised
    /// during tracker startup and surfaced through the tracker event channel.
    #[error("failed to load hand tracking model")]
    ModelLoad(#[source] anyhow::Error),

    /// One inference pass failed. Logged and contained inside the tracking
    /// loop; never terminates it.
    #[error("hand tracking tick failed")]
    InferenceTick(#[source] anyhow::Error),

    /// A joint-table node name was not found in the rig asset. The joint is
    /// left unanimated.
    #[error("rig node `{node}` for landmark {landmark} not found")]
    MissingRigNode { node: String, landmark: usize },
}
