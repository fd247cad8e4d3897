use serde::Serialize;

/// Visibility toggles for the geographical map layers.
///
/// The backend defaults every layer to visible, so only exclusions travel
/// on the wire: each toggle that is off becomes one repeated `hide=<name>`
/// query parameter, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MapLayerFilters {
    pub ssh_attacks: bool,
    pub ssh_successful: bool,
    pub open_project: bool,
    pub https: bool,
}

impl Default for MapLayerFilters {
    fn default() -> Self {
        Self {
            ssh_attacks: true,
            ssh_successful: true,
            open_project: true,
            https: true,
        }
    }
}

impl MapLayerFilters {
    pub fn to_query(&self) -> Vec<(&'static str, &'static str)> {
        let toggles = [
            ("sshAttacks", self.ssh_attacks),
            ("sshSuccessful", self.ssh_successful),
            ("openProject", self.open_project),
            ("https", self.https),
        ];

        toggles
            .into_iter()
            .filter(|(_, visible)| !visible)
            .map(|(name, _)| ("hide", name))
            .collect()
    }
}
