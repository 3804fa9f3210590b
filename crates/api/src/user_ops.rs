//! Account-level operations: user info, capacity, daily sign-in.

use std::collections::BTreeMap;

use tianyi_model::{StorageQuota, User};

use crate::client::CloudClient;
use crate::error::CloudError;
use crate::types::{CapacityInfo, SignInResult, UserInfo};

impl CloudClient {
    pub async fn get_user_info(&self) -> Result<User, CloudError> {
        let rsp: UserInfo = self.app_get("/getUserInfo.action", &BTreeMap::new()).await?;
        Ok(rsp.to_model())
    }

    pub async fn get_capacity(&self) -> Result<StorageQuota, CloudError> {
        let rsp: CapacityInfo = self.app_get("/getUserInfo.action", &BTreeMap::new()).await?;
        Ok(rsp.to_model())
    }

    /// Daily attendance call; the response carries any prize granted.
    pub async fn sign_in(&self) -> Result<SignInResult, CloudError> {
        self.app_get("/mkt/userSign.action", &BTreeMap::new()).await
    }
}
