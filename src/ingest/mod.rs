/// Clients for the remote services a reach is built from
///
/// - `waters`: EPA WATERS network snapping and navigation (primary tracing)
/// - `hydrology`: elevation-derived watershed and trace tasks (fallback tracing)
/// - `whitewater`: American Whitewater reach descriptions
/// - `arcgis`: REST plumbing shared by the ArcGIS-hosted services

pub mod arcgis;
pub mod hydrology;
pub mod waters;
pub mod whitewater;
