//! Instance location keys (`wrld_...:12345~group(grp_...)~region(us)`).

use serde::Serialize;

/// A parsed `world:instance` location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationKey {
    pub world_id: String,
    /// Full instance qualifier as written in the log.
    pub instance: String,
    /// Leading instance name before the first `~`.
    pub instance_name: String,
    pub group_id: Option<String>,
    pub access_type: String,
    pub region: Option<String>,
    pub owner_id: Option<String>,
}

impl LocationKey {
    pub fn new(world_id: &str, instance: &str) -> Self {
        let mut parts = instance.split('~');
        let instance_name = parts.next().unwrap_or_default().to_string();

        let mut key = Self {
            world_id: world_id.to_string(),
            instance: instance.to_string(),
            instance_name,
            group_id: None,
            access_type: "public".to_string(),
            region: None,
            owner_id: None,
        };

        let mut group_access = None;
        for part in parts {
            let (name, value) = split_qualifier(part);
            match name {
                "group" => {
                    key.group_id = value.map(str::to_string);
                    key.access_type = "group".to_string();
                }
                "groupAccessType" => group_access = value,
                "region" => key.region = value.map(str::to_string),
                "private" | "friends" | "hidden" => {
                    key.access_type = name.to_string();
                    key.owner_id = value.map(str::to_string);
                }
                _ => {}
            }
        }
        if let (Some(_), Some(access)) = (&key.group_id, group_access) {
            key.access_type = format!("group-{access}");
        }
        key
    }

    /// Parses a composed `world:instance` string.
    pub fn parse(location: &str) -> Option<Self> {
        let (world, instance) = location.split_once(':')?;
        if world.is_empty() || instance.is_empty() {
            return None;
        }
        Some(Self::new(world, instance))
    }

    /// The composed `world:instance` string.
    pub fn composed(&self) -> String {
        format!("{}:{}", self.world_id, self.instance)
    }
}

/// `name(value)` or bare `name`.
fn split_qualifier(part: &str) -> (&str, Option<&str>) {
    match part.split_once('(') {
        Some((name, rest)) => (name, rest.strip_suffix(')')),
        None => (part, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_instance() {
        let key = LocationKey::parse(
            "wrld_1:82917~group(grp_abc)~groupAccessType(plus)~region(eu)",
        )
        .unwrap();
        assert_eq!(key.world_id, "wrld_1");
        assert_eq!(key.instance_name, "82917");
        assert_eq!(key.group_id.as_deref(), Some("grp_abc"));
        assert_eq!(key.access_type, "group-plus");
        assert_eq!(key.region.as_deref(), Some("eu"));
        assert_eq!(key.composed(), "wrld_1:82917~group(grp_abc)~groupAccessType(plus)~region(eu)");
    }

    #[test]
    fn private_and_public_instances() {
        let private = LocationKey::new("wrld_1", "1~private(usr_x)~canRequestInvite~region(us)");
        assert_eq!(private.access_type, "private");
        assert_eq!(private.owner_id.as_deref(), Some("usr_x"));
        assert!(private.group_id.is_none());

        let public = LocationKey::new("wrld_1", "55");
        assert_eq!(public.access_type, "public");
        assert!(public.region.is_none());

        assert!(LocationKey::parse("offline").is_none());
    }
}
