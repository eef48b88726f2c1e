// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sequential page scanner over the source's workflow executions.

use std::sync::Arc;

use replicator_engine::{RetryConfig, retry};
use tracing::debug;

use crate::client::{ListWorkflowsRequest, ListWorkflowsResponse, WorkflowLister};
use crate::error::{MigrationError, Result};
use crate::params::MigrationParams;
use crate::token::{PageToken, normalize};

/// One page of executions.
pub type Page = ListWorkflowsResponse;

/// Fetches pages strictly in source order, one request at a time.
pub struct PageScanner {
    lister: Arc<dyn WorkflowLister>,
    namespace: String,
    query: String,
    page_size: usize,
    next_page_token: Option<PageToken>,
    exhausted: bool,
    pages_fetched: usize,
    retry: RetryConfig,
}

impl PageScanner {
    /// Scanner resuming from the params' continuation token.
    pub fn new(lister: Arc<dyn WorkflowLister>, params: &MigrationParams, retry: RetryConfig) -> Self {
        Self {
            lister,
            namespace: params.namespace.clone(),
            query: params.query.clone(),
            page_size: params.list_workflows_page_size,
            next_page_token: normalize(params.next_page_token.clone()),
            exhausted: false,
            pages_fetched: 0,
            retry,
        }
    }

    /// Token of the next page to fetch.
    pub fn next_page_token(&self) -> Option<&PageToken> {
        self.next_page_token.as_ref()
    }

    /// Whether the source reported its last page.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetch the next page, or `None` once the source is exhausted.
    ///
    /// Transient list errors are retried per the retry policy; anything
    /// else ends the scan with [`MigrationError::Scan`].
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.exhausted {
            return Ok(None);
        }

        let request = ListWorkflowsRequest {
            namespace: self.namespace.clone(),
            query: self.query.clone(),
            page_size: self.page_size,
            next_page_token: self.next_page_token.clone(),
        };
        let lister = self.lister.clone();
        let mut page = retry(&self.retry, "ListWorkflows", |_| {
            let lister = lister.clone();
            let request = request.clone();
            async move { lister.list_workflows(request).await }
        })
        .await
        .map_err(MigrationError::Scan)?;

        page.next_page_token = normalize(page.next_page_token.take());
        self.pages_fetched += 1;
        self.exhausted = page.next_page_token.is_none();
        self.next_page_token = page.next_page_token.clone();

        debug!(
            page = self.pages_fetched,
            executions = page.executions.len(),
            exhausted = self.exhausted,
            "Fetched page"
        );
        Ok(Some(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientResult, WorkflowExecution};
    use crate::error::ClientError;
    use async_trait::async_trait;
    use replicator_engine::RetryStrategy;
    use tokio::sync::Mutex;

    struct ScriptedLister {
        calls: Mutex<Vec<Option<PageToken>>>,
        pages: usize,
        fail_with: Option<ClientError>,
    }

    #[async_trait]
    impl WorkflowLister for ScriptedLister {
        async fn list_workflows(
            &self,
            request: ListWorkflowsRequest,
        ) -> ClientResult<ListWorkflowsResponse> {
            let mut calls = self.calls.lock().await;
            calls.push(request.next_page_token.clone());
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            let n = calls.len();
            Ok(ListWorkflowsResponse {
                executions: vec![WorkflowExecution::new(format!("wf-{}", n), "run")],
                next_page_token: if n < self.pages {
                    Some(PageToken::from(format!("token-{}", n).as_str()))
                } else {
                    Some(PageToken::from(""))
                },
                ..Default::default()
            })
        }
    }

    fn params() -> MigrationParams {
        let mut params = MigrationParams::new("test-ns", "target");
        params.validate_and_apply_defaults().unwrap();
        params
    }

    #[tokio::test]
    async fn test_scans_in_order_until_exhausted() {
        let lister = Arc::new(ScriptedLister {
            calls: Mutex::new(Vec::new()),
            pages: 3,
            fail_with: None,
        });
        let mut scanner = PageScanner::new(lister.clone(), &params(), RetryConfig::no_retries());

        let mut ids = Vec::new();
        while let Some(page) = scanner.next_page().await.unwrap() {
            ids.push(page.executions[0].workflow_id.clone());
        }

        assert_eq!(ids, vec!["wf-1", "wf-2", "wf-3"]);
        assert!(scanner.is_exhausted());
        assert_eq!(scanner.next_page_token(), None);
        assert_eq!(
            *lister.calls.lock().await,
            vec![
                None,
                Some(PageToken::from("token-1")),
                Some(PageToken::from("token-2"))
            ]
        );
    }

    #[tokio::test]
    async fn test_resumes_from_carried_token() {
        let lister = Arc::new(ScriptedLister {
            calls: Mutex::new(Vec::new()),
            pages: 5,
            fail_with: None,
        });
        let mut p = params();
        p.next_page_token = Some(PageToken::from("token-7"));
        let mut scanner = PageScanner::new(lister.clone(), &p, RetryConfig::no_retries());

        scanner.next_page().await.unwrap();
        assert_eq!(
            lister.calls.lock().await[0],
            Some(PageToken::from("token-7"))
        );
    }

    #[tokio::test]
    async fn test_list_error_is_scan_error() {
        let lister = Arc::new(ScriptedLister {
            calls: Mutex::new(Vec::new()),
            pages: 5,
            fail_with: Some(ClientError::retryable("mock listWorkflows error")),
        });
        let retry = RetryConfig::new(2, 1, RetryStrategy::Fixed);
        let mut scanner = PageScanner::new(lister.clone(), &params(), retry);

        let err = scanner.next_page().await.unwrap_err();
        assert!(matches!(err, MigrationError::Scan(_)));
        assert!(err.to_string().contains("mock listWorkflows error"));
        assert_eq!(lister.calls.lock().await.len(), 3);
    }
}
