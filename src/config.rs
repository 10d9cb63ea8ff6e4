/// Endpoint and sponsorship configuration for one pipeline run.
///
/// Deliberately an explicit value handed to the clients that need it, never
/// ambient process state. Fields are validated for presence only; a bad URL
/// shows up as the first failing network call.
#[derive(Clone, Debug)]
pub struct Config {
    pub chain_id: u64,
    pub node_url: String,
    pub bundler_url: String,
    pub paymaster_url: Option<String>,
    pub sponsorship_policy_id: Option<String>,
}

impl Config {
    /// Sponsorship requires both a paymaster endpoint and a policy id;
    /// one without the other is a configuration mistake worth flagging.
    pub fn sponsorship(&self) -> anyhow::Result<Option<(&str, &str)>> {
        match (
            self.paymaster_url.as_deref(),
            self.sponsorship_policy_id.as_deref(),
        ) {
            (Some(url), Some(policy)) => Ok(Some((url, policy))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(anyhow::anyhow!(
                "PAYMASTER_URL is set but SPONSORSHIP_POLICY_ID is missing"
            )),
            (None, Some(_)) => Err(anyhow::anyhow!(
                "SPONSORSHIP_POLICY_ID is set but PAYMASTER_URL is missing"
            )),
        }
    }
}
