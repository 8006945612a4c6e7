//! Request paths for each operation

use uuid::Uuid;

/// Base path of the upload service API
pub const API_BASE_PATH: &str = "/dokumentlager/api/v1";

/// Base path of the download service
pub const DOWNLOAD_BASE_PATH: &str = "/dokumentlager/nedlasting";

/// Maps operations to request paths.
///
/// Deployments behind a gateway with a different layout can supply their
/// own implementation.
pub trait PathHandler: Send + Sync {
    fn upload_path(&self, organization_id: Uuid, account_id: Uuid) -> String;

    fn document_path(&self, organization_id: Uuid, account_id: Uuid, document_id: Uuid) -> String;

    fn correlation_path(&self, organization_id: Uuid, account_id: Uuid, correlation_id: Uuid) -> String;

    fn search_path(&self, organization_id: Uuid, account_id: Uuid) -> String;

    fn public_key_path(&self) -> String;

    fn download_path(&self, document_id: Uuid) -> String;

    fn download_metadata_path(&self, document_id: Uuid) -> String;
}

/// The paths used by the public Fiks platform
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPathHandler;

impl DefaultPathHandler {
    fn account(organization_id: Uuid, account_id: Uuid) -> String {
        format!("{}/{}/kontoer/{}/dokumenter", API_BASE_PATH, organization_id, account_id)
    }
}

impl PathHandler for DefaultPathHandler {
    fn upload_path(&self, organization_id: Uuid, account_id: Uuid) -> String {
        format!("{}/", Self::account(organization_id, account_id))
    }

    fn document_path(&self, organization_id: Uuid, account_id: Uuid, document_id: Uuid) -> String {
        format!("{}/{}", Self::account(organization_id, account_id), document_id)
    }

    fn correlation_path(&self, organization_id: Uuid, account_id: Uuid, correlation_id: Uuid) -> String {
        format!(
            "{}/korrelasjonsid/{}",
            Self::account(organization_id, account_id),
            correlation_id
        )
    }

    fn search_path(&self, organization_id: Uuid, account_id: Uuid) -> String {
        format!("{}/sok", Self::account(organization_id, account_id))
    }

    fn public_key_path(&self) -> String {
        format!("{}/public-key", API_BASE_PATH)
    }

    fn download_path(&self, document_id: Uuid) -> String {
        format!("{}/{}", DOWNLOAD_BASE_PATH, document_id)
    }

    fn download_metadata_path(&self, document_id: Uuid) -> String {
        format!("{}/{}/metadata", DOWNLOAD_BASE_PATH, document_id)
    }
}
