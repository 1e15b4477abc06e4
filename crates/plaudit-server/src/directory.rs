use std::collections::HashMap;

use async_trait::async_trait;
use plaudit_config::CrmClient;
use plaudit_contracts::ClientProfile;
use plaudit_kernel::normalize_phone;

use crate::error::StoreError;

/// CRM lookup by submitter e-mail.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn lookup(&self, email: &str) -> Result<Option<ClientProfile>, StoreError>;
}

/// Directory loaded once from the `crm.clients` config section.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    by_email: HashMap<String, ClientProfile>,
}

fn key(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl StaticDirectory {
    pub fn from_config(clients: &[CrmClient], default_country_code: &str) -> Self {
        let by_email = clients
            .iter()
            .map(|c| {
                let profile = ClientProfile {
                    name: if c.name.trim().is_empty() {
                        ClientProfile::DEFAULT_NAME.to_string()
                    } else {
                        c.name.trim().to_string()
                    },
                    company: c.company.trim().to_string(),
                    services: c.services.trim().to_string(),
                    whatsapp: c
                        .whatsapp
                        .as_deref()
                        .and_then(|p| normalize_phone(p, default_country_code)),
                    business_email: c
                        .business_email
                        .as_deref()
                        .map(str::trim)
                        .filter(|e| !e.is_empty())
                        .map(str::to_string)
                        .or_else(|| Some(c.email.trim().to_string())),
                    found: true,
                };
                (key(&c.email), profile)
            })
            .collect();
        Self { by_email }
    }

    pub fn len(&self) -> usize {
        self.by_email.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_email.is_empty()
    }
}

#[async_trait]
impl ClientDirectory for StaticDirectory {
    async fn lookup(&self, email: &str) -> Result<Option<ClientProfile>, StoreError> {
        Ok(self.by_email.get(&key(email)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_is_case_insensitive_and_normalises_phone() {
        let dir = StaticDirectory::from_config(
            &[CrmClient {
                email: "Asha@Example.com".to_string(),
                name: "Asha Rao".to_string(),
                company: "Rao Logistics".to_string(),
                services: "Web".to_string(),
                whatsapp: Some("98765-43210".to_string()),
                business_email: None,
            }],
            "+91",
        );
        let profile = dir.lookup(" asha@example.com").await.unwrap().unwrap();
        assert!(profile.found);
        assert_eq!(profile.whatsapp.as_deref(), Some("+919876543210"));
        assert_eq!(profile.business_email.as_deref(), Some("Asha@Example.com"));
        assert!(dir.lookup("nobody@example.com").await.unwrap().is_none());
    }
}
