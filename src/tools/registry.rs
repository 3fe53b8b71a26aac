// ABOUTME: Two-tier tool registry: an immutable global catalogue plus a per-session binding table.
// ABOUTME: Binding happens once at session setup; turns only read the resulting table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::metadata::{Tool, ToolMetadata};
use crate::session::Session;

/// Tools available to every session. Built once, never mutated.
#[derive(Clone, Default)]
pub struct ToolCatalog {
    tools: Arc<Vec<Arc<dyn Tool>>>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            tools: Arc::new(tools),
        }
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Supplies the tools that only make sense for one particular session.
#[async_trait]
pub trait ToolBinder: Send + Sync {
    async fn bind(&self, session: &Session) -> anyhow::Result<Vec<Arc<dyn Tool>>>;
}

/// The tools bound to one session, looked up by name.
///
/// Session-specific tools override catalogue tools of the same name.
#[derive(Clone, Default)]
pub struct SessionTools {
    order: Arc<Vec<String>>,
    by_name: Arc<HashMap<String, Arc<dyn Tool>>>,
}

impl SessionTools {
    /// Merge catalogue and session tools into one binding table.
    pub fn merge(catalog: &ToolCatalog, session_tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut order = Vec::new();
        let mut by_name: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        for tool in catalog.tools().iter().cloned().chain(session_tools) {
            let name = tool.metadata().name.clone();
            if by_name.insert(name.clone(), tool).is_none() {
                order.push(name);
            }
        }
        Self {
            order: Arc::new(order),
            by_name: Arc::new(by_name),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name)
    }

    /// Declared metadata of a bound tool.
    pub fn metadata(&self, name: &str) -> Option<&ToolMetadata> {
        self.get(name).map(|tool| tool.metadata())
    }

    /// Metadata of every bound tool, in binding order.
    pub fn definitions(&self) -> Vec<ToolMetadata> {
        self.order
            .iter()
            .filter_map(|name| self.metadata(name))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl std::fmt::Debug for SessionTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTools")
            .field("tools", &self.order)
            .finish()
    }
}

/// Bind tools into `session` unless that already happened, and return its table.
///
/// A failing binder is logged and the session falls back to the catalogue alone.
pub async fn bind_session_tools<'s>(
    session: &'s Session,
    catalog: &ToolCatalog,
    binder: Option<&dyn ToolBinder>,
) -> &'s SessionTools {
    if let Some(tools) = session.bound_tools() {
        return tools;
    }

    let session_tools = match binder {
        Some(binder) => binder.bind(session).await.unwrap_or_else(|error| {
            tracing::warn!(
                session_id = %session.session_id(),
                %error,
                "session tool binding failed, using catalogue only"
            );
            Vec::new()
        }),
        None => Vec::new(),
    };
    let tools = SessionTools::merge(catalog, session_tools);
    tracing::debug!(
        session_id = %session.session_id(),
        tools = ?tools.names(),
        "bound session tools"
    );
    session.bound_tools_or_init(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{DeviceRef, RoleRef};
    use crate::tools::FunctionTool;

    fn tool(name: &str, description: &str) -> Arc<dyn Tool> {
        Arc::new(FunctionTool::new(
            ToolMetadata::new(name, description),
            |_, _| Ok(String::new()),
        ))
    }

    struct FixedBinder(Vec<Arc<dyn Tool>>);

    #[async_trait]
    impl ToolBinder for FixedBinder {
        async fn bind(&self, _session: &Session) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenBinder;

    #[async_trait]
    impl ToolBinder for BrokenBinder {
        async fn bind(&self, _session: &Session) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
            anyhow::bail!("device registry unavailable")
        }
    }

    fn session() -> Session {
        Session::new("s", DeviceRef::new("dev"), RoleRef::new(1, "r"))
    }

    #[test]
    fn session_tools_override_catalogue_by_name() {
        let catalog = ToolCatalog::new(vec![tool("weather", "global"), tool("time", "global")]);
        let tools = SessionTools::merge(&catalog, vec![tool("weather", "local")]);

        assert_eq!(tools.len(), 2);
        assert_eq!(tools.names(), &["weather".to_string(), "time".to_string()]);
        assert_eq!(tools.metadata("weather").unwrap().description, "local");
        assert!(tools.get("missing").is_none());
    }

    #[tokio::test]
    async fn binding_happens_once() {
        let session = session();
        let catalog = ToolCatalog::new(vec![tool("time", "global")]);
        let binder = FixedBinder(vec![tool("end_chat", "session")]);

        let first = bind_session_tools(&session, &catalog, Some(&binder)).await;
        assert_eq!(first.len(), 2);

        let other = FixedBinder(vec![tool("x", ""), tool("y", ""), tool("z", "")]);
        let second = bind_session_tools(&session, &catalog, Some(&other)).await;
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn broken_binder_falls_back_to_catalogue() {
        let session = session();
        let catalog = ToolCatalog::new(vec![tool("time", "global")]);
        let tools = bind_session_tools(&session, &catalog, Some(&BrokenBinder)).await;
        assert_eq!(tools.names(), &["time".to_string()]);
    }
}
