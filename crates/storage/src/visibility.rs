//! Public/private visibility on top of Drive permissions.
//!
//! Drive has arbitrary permission lists. An object counts as public when its
//! list contains a permission matching the configured publish template
//! (`anyone` + `reader` by default); publishing adds that permission and
//! unpublishing removes every `anyone`/`reader` grant.

use std::fmt;
use std::str::FromStr;

use drivefs_api::{ApiHandle, DriveFile, Permission};
use drivefs_config::PublishPermission;

use crate::cache::SharedCache;
use crate::error::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Public => "public",
            Self::Private => "private",
        })
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            _ => exn::bail!(ErrorKind::VisibilityFailure(format!("unknown visibility {s:?}"))),
        }
    }
}

/// The permission that makes an object public.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTemplate {
    kind: String,
    role: String,
    with_link: bool,
}

impl PublishTemplate {
    pub fn new(kind: impl Into<String>, role: impl Into<String>, with_link: bool) -> Self {
        Self {
            kind: kind.into(),
            role: role.into(),
            with_link,
        }
    }

    /// Whether an existing permission grants what the template would.
    pub fn matches(&self, permission: &Permission) -> bool {
        permission.kind == self.kind && permission.role == self.role
    }

    /// The permission to create when publishing.
    pub fn permission(&self) -> Permission {
        let mut permission = Permission::new(&self.kind, &self.role);
        if self.kind == "anyone" || self.kind == "domain" {
            permission.allow_file_discovery = Some(!self.with_link);
        }
        permission
    }

    pub fn visibility_of(&self, file: &DriveFile) -> Visibility {
        match file.permissions.iter().any(|p| self.matches(p)) {
            true => Visibility::Public,
            false => Visibility::Private,
        }
    }
}

impl Default for PublishTemplate {
    fn default() -> Self {
        Self::from(&PublishPermission::default())
    }
}

impl From<&PublishPermission> for PublishTemplate {
    fn from(config: &PublishPermission) -> Self {
        Self::new(&config.kind, &config.role, config.with_link)
    }
}

fn is_public_grant(permission: &Permission) -> bool {
    permission.kind == "anyone" && permission.role == "reader"
}

pub struct VisibilityManager {
    api: ApiHandle,
    cache: SharedCache,
    template: PublishTemplate,
}

impl VisibilityManager {
    pub fn new(api: ApiHandle, cache: SharedCache, template: PublishTemplate) -> Self {
        Self { api, cache, template }
    }

    pub fn template(&self) -> &PublishTemplate {
        &self.template
    }

    pub fn visibility(&self, file: &DriveFile) -> Visibility {
        self.template.visibility_of(file)
    }

    /// Grant the publish permission. Returns `false` (after logging) if Drive
    /// refused; never fails.
    pub async fn publish(&self, file: &DriveFile) -> bool {
        if self.visibility(file) == Visibility::Public {
            return true;
        }
        match self.api.create_permission(&file.id, &self.template.permission()).await {
            Ok(created) => {
                let mut updated = file.clone();
                updated.permissions.push(created);
                self.cache.lock().await.put(None, updated);
                tracing::debug!(id = %file.id, "published");
                true
            },
            Err(err) => {
                tracing::warn!(id = %file.id, error = %err, "unable to publish");
                false
            },
        }
    }

    /// Remove every `anyone`/`reader` permission. Returns `false` (after
    /// logging) if Drive refused; never fails.
    pub async fn unpublish(&self, file: &DriveFile) -> bool {
        let permissions = match self.api.list_permissions(&file.id).await {
            Ok(permissions) => permissions,
            Err(err) => {
                tracing::warn!(id = %file.id, error = %err, "unable to list permissions");
                return false;
            },
        };
        let mut remaining = Vec::with_capacity(permissions.len());
        for permission in permissions {
            match (&permission.id, is_public_grant(&permission)) {
                (Some(permission_id), true) => {
                    if let Err(err) = self.api.delete_permission(&file.id, permission_id).await {
                        tracing::warn!(id = %file.id, error = %err, "unable to unpublish");
                        return false;
                    }
                },
                _ => remaining.push(permission),
            }
        }
        let mut updated = file.clone();
        updated.permissions = remaining;
        self.cache.lock().await.put(None, updated);
        tracing::debug!(id = %file.id, "unpublished");
        true
    }

    pub async fn apply(&self, file: &DriveFile, visibility: Visibility) -> bool {
        match visibility {
            Visibility::Public => self.publish(file).await,
            Visibility::Private => self.unpublish(file).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ObjectCache;
    use drivefs_api::{MOCK_ROOT_ID, MockDrive, Op};
    use std::sync::Arc;

    fn manager(drive: &Arc<MockDrive>) -> VisibilityManager {
        VisibilityManager::new(drive.clone(), ObjectCache::shared(), PublishTemplate::default())
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("PUBLIC".parse::<Visibility>().unwrap(), Visibility::Public);
        assert_eq!(Visibility::Private.to_string(), "private");
        assert!("secret".parse::<Visibility>().is_err());
    }

    #[test]
    fn test_template_permission() {
        let permission = PublishTemplate::default().permission();
        assert_eq!(permission.kind, "anyone");
        assert_eq!(permission.role, "reader");
        assert_eq!(permission.allow_file_discovery, Some(false));
        let user = PublishTemplate::new("user", "reader", true).permission();
        assert_eq!(user.allow_file_discovery, None);
    }

    #[tokio::test]
    async fn test_publish_round_trip() {
        let drive = Arc::new(MockDrive::new());
        let file = drive.insert_file("a.txt", MOCK_ROOT_ID, "text/plain", "a").await;
        let manager = manager(&drive);
        assert_eq!(manager.visibility(&file), Visibility::Private);

        assert!(manager.publish(&file).await);
        let published = drive.file(&file.id).await.unwrap();
        assert_eq!(manager.visibility(&published), Visibility::Public);

        // Publishing a public object is a no-op.
        assert!(manager.publish(&published).await);
        assert_eq!(drive.call_count(Op::CreatePermission).await, 1);

        assert!(manager.unpublish(&published).await);
        assert_eq!(manager.visibility(&drive.file(&file.id).await.unwrap()), Visibility::Private);
    }

    #[tokio::test]
    async fn test_unpublish_keeps_other_grants() {
        let drive = Arc::new(MockDrive::new());
        let file = drive.insert_file("a.txt", MOCK_ROOT_ID, "text/plain", "a").await;
        drive.insert_permission(&file.id, Permission::new("anyone", "reader")).await;
        drive.insert_permission(&file.id, Permission::new("anyone", "reader")).await;
        let mut owner = Permission::new("user", "owner");
        owner.email_address = Some("me@example.com".into());
        drive.insert_permission(&file.id, owner).await;

        let manager = manager(&drive);
        assert!(manager.unpublish(&file).await);
        let permissions = drive.file(&file.id).await.unwrap().permissions;
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].role, "owner");
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let drive = Arc::new(MockDrive::new());
        let file = drive.insert_file("a.txt", MOCK_ROOT_ID, "text/plain", "a").await;
        let manager = manager(&drive);
        drive
            .fail_next(Op::CreatePermission, 1, drivefs_api::error::ErrorKind::PermissionDenied("nope".into()))
            .await;
        assert!(!manager.publish(&file).await);
        drive
            .fail_next(Op::ListPermissions, 1, drivefs_api::error::ErrorKind::Network("reset".into()))
            .await;
        assert!(!manager.unpublish(&file).await);
    }
}
