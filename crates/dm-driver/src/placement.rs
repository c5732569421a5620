//! Placement group resolution, auto-spread and cleanup of empty groups.

use tracing::{debug, info};

use crate::dangling::ResourceKind;
use crate::driver::Driver;
use crate::error::{Result, ResultExt};
use crate::types::{CreatePlacementGroupRequest, Labels, PlacementGroup, Server};

/// Prefix for every label this driver sets.
pub const LABEL_NAMESPACE: &str = "hcloud-docker-machine";
pub const LABEL_AUTO_SPREAD: &str = "auto-spread";
pub const LABEL_AUTO_CREATED: &str = "auto-created";

/// Placement group name that selects the shared auto-spread group.
pub const AUTO_SPREAD_PG_NAME: &str = "__auto_spread";
const AUTO_SPREAD_DISPLAY_NAME: &str = "Docker-Machine auto spread";
const PLACEMENT_GROUP_TYPE: &str = "spread";

/// `hcloud-docker-machine/<name>`
pub fn label_name(name: &str) -> String {
    format!("{LABEL_NAMESPACE}/{name}")
}

fn is_auto_created(group: &PlacementGroup) -> bool {
    group
        .labels
        .get(&label_name(LABEL_AUTO_CREATED))
        .is_some_and(|v| v == "true")
}

impl Driver {
    /// The group to place the server in, created on demand. `None` when no
    /// group was requested.
    pub(crate) async fn placement_group(&mut self) -> Result<Option<PlacementGroup>> {
        if self.config.placement_group.is_empty() {
            return Ok(None);
        }
        if let Some(cached) = &self.cache.placement_group {
            return Ok(Some(cached.clone()));
        }

        let group = if self.config.placement_group == AUTO_SPREAD_PG_NAME {
            self.auto_placement_group().await?
        } else {
            let name = self.config.placement_group.clone();
            match self
                .api()
                .placement_group(&name)
                .await
                .context("could not get placement group")?
            {
                Some(group) => group,
                None => {
                    let labels = Labels::from([(label_name(LABEL_AUTO_CREATED), "true".into())]);
                    self.make_placement_group(name, labels).await?
                }
            }
        };

        self.observe("placement group", &group);
        self.cache.placement_group = Some(group.clone());
        Ok(Some(group))
    }

    async fn auto_placement_group(&mut self) -> Result<PlacementGroup> {
        let existing = self
            .api()
            .placement_groups_by_label(&label_name(LABEL_AUTO_SPREAD))
            .await
            .context("could not list placement groups")?;
        if let Some(group) = existing.into_iter().next() {
            return Ok(group);
        }

        let labels = Labels::from([
            (label_name(LABEL_AUTO_SPREAD), "true".into()),
            (label_name(LABEL_AUTO_CREATED), "true".into()),
        ]);
        self.make_placement_group(AUTO_SPREAD_DISPLAY_NAME.into(), labels)
            .await
    }

    /// Create a group and register it for rollback.
    async fn make_placement_group(&mut self, name: String, labels: Labels) -> Result<PlacementGroup> {
        let req = CreatePlacementGroupRequest {
            name,
            labels,
            kind: PLACEMENT_GROUP_TYPE.into(),
        };
        self.observe("placement group request", &req);

        let group = self
            .api()
            .create_placement_group(&req)
            .await
            .context("could not create placement group")?;
        info!(placement_group = %group.name, id = group.id, "created placement group");
        self.dangling
            .register(ResourceKind::PlacementGroup, group.id, group.name.clone());
        Ok(group)
    }

    /// Delete the server's group when we created it and the server was its
    /// only member.
    pub(crate) async fn remove_empty_server_placement_group(&mut self, server: &Server) -> Result<()> {
        let Some(group) = &server.placement_group else {
            return Ok(());
        };
        if group.servers.len() > 1 {
            debug!(placement_group = %group.name, members = group.servers.len(), "group still in use, keeping it");
            return Ok(());
        }
        if !is_auto_created(group) {
            debug!(placement_group = %group.name, "group not auto-created, keeping it");
            return Ok(());
        }

        self.api()
            .delete_placement_group(group.id)
            .await
            .context("could not remove placement group")?;
        info!(placement_group = %group.name, id = group.id, "removed empty placement group");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{FakeCloud, driver_with};

    #[tokio::test]
    async fn no_group_requested() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let mut d = driver_with(&cloud);
        assert!(d.placement_group().await.unwrap().is_none());
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn existing_named_group_is_used_as_is() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let existing = cloud.add_placement_group("web", Labels::new());
        let mut d = driver_with(&cloud);
        d.config.placement_group = "web".into();

        let group = d.placement_group().await.unwrap().unwrap();
        assert_eq!(group.id, existing.id);
        assert!(d.dangling().is_empty());
    }

    #[tokio::test]
    async fn missing_named_group_is_created_and_tracked() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let mut d = driver_with(&cloud);
        d.config.placement_group = "web".into();

        let group = d.placement_group().await.unwrap().unwrap();
        assert_eq!(group.name, "web");
        assert_eq!(group.kind, "spread");
        assert!(is_auto_created(&group));
        assert_eq!(d.dangling().pending()[0].kind, ResourceKind::PlacementGroup);
        assert_eq!(d.dangling().pending()[0].id, group.id);

        // memoized: no second create
        d.placement_group().await.unwrap();
        assert_eq!(cloud.count("create_placement_group"), 1);
    }

    #[tokio::test]
    async fn auto_spread_reuses_labelled_group() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let shared = cloud.add_placement_group(
            "shared",
            Labels::from([(label_name(LABEL_AUTO_SPREAD), "true".to_string())]),
        );
        let mut d = driver_with(&cloud);
        d.config.placement_group = AUTO_SPREAD_PG_NAME.into();

        assert_eq!(d.placement_group().await.unwrap().unwrap().id, shared.id);
        assert_eq!(cloud.count("create_placement_group"), 0);
    }

    #[tokio::test]
    async fn auto_spread_creates_group_when_none_exists() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let mut d = driver_with(&cloud);
        d.config.placement_group = AUTO_SPREAD_PG_NAME.into();

        let group = d.placement_group().await.unwrap().unwrap();
        assert_eq!(group.name, "Docker-Machine auto spread");
        assert_eq!(group.labels[&label_name(LABEL_AUTO_SPREAD)], "true");
        assert_eq!(group.labels[&label_name(LABEL_AUTO_CREATED)], "true");
        assert_eq!(d.dangling().pending().len(), 1);
    }

    #[tokio::test]
    async fn empty_group_cleanup_respects_membership_and_origin() {
        let cloud = Arc::new(FakeCloud::with_catalog());
        let auto = Labels::from([(label_name(LABEL_AUTO_CREATED), "true".to_string())]);
        let mut d = driver_with(&cloud);

        let mut server = cloud.server_template("m");
        let mut group = cloud.add_placement_group("crowded", auto.clone());
        group.servers = vec![1, 2];
        server.placement_group = Some(group);
        d.remove_empty_server_placement_group(&server).await.unwrap();

        let mut group = cloud.add_placement_group("user-made", Labels::new());
        group.servers = vec![1];
        server.placement_group = Some(group);
        d.remove_empty_server_placement_group(&server).await.unwrap();

        assert_eq!(cloud.count("delete_placement_group"), 0);

        let mut group = cloud.add_placement_group("ours", auto);
        group.servers = vec![1];
        let id = group.id;
        server.placement_group = Some(group);
        d.remove_empty_server_placement_group(&server).await.unwrap();
        assert_eq!(cloud.calls(), vec![format!("delete_placement_group:{id}")]);
    }
}
