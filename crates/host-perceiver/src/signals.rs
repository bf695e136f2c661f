use autorefresh_core_types::{HostSignal, NavigationEvent, NavigationSource, RouteDescriptor};
use cdp_adapter::RawEvent;
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// Message posted by the navigation hook script through the page binding.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum HookMessage {
    Route {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        path: Option<String>,
    },
    History {
        #[serde(default)]
        path: String,
    },
    Teardown,
}

/// Map one adapter event to the host signal it stands for, if any.
pub fn translate(event: &RawEvent, binding: &str) -> Option<HostSignal> {
    match event {
        RawEvent::BindingCalled { name, payload, .. } if name == binding => {
            match serde_json::from_str::<HookMessage>(payload) {
                Ok(HookMessage::Route { name, path }) => {
                    Some(HostSignal::RouteChanged(NavigationEvent::new(
                        RouteDescriptor {
                            name: name.filter(|n| !n.is_empty()),
                            path,
                        },
                        NavigationSource::Router,
                    )))
                }
                Ok(HookMessage::History { path }) => Some(HostSignal::HistoryNavigated { path }),
                Ok(HookMessage::Teardown) => Some(HostSignal::Teardown),
                Err(err) => {
                    debug!(target: "host-perceiver", %err, payload, "ignoring malformed hook message");
                    None
                }
            }
        }
        RawEvent::PageNavigated { url, .. } | RawEvent::PageReattached { url, .. } => {
            Some(HostSignal::DocumentReplaced { url: url.clone() })
        }
        // The popstate listener may report the same change; the watcher's settle slot absorbs it.
        RawEvent::SameDocumentNavigated { url, .. } => Some(HostSignal::HistoryNavigated {
            path: url_path(url),
        }),
        RawEvent::PageClosed { .. } => Some(HostSignal::Teardown),
        _ => None,
    }
}

fn url_path(raw: &str) -> String {
    Url::parse(raw)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::PageId;

    fn binding(payload: &str) -> RawEvent {
        RawEvent::BindingCalled {
            page: PageId::new(),
            name: "hook".into(),
            payload: payload.into(),
        }
    }

    #[test]
    fn route_messages() {
        let signal = translate(
            &binding(r#"{"kind":"route","name":"Leads","path":"/crm/leads"}"#),
            "hook",
        );
        assert_eq!(
            signal,
            Some(HostSignal::RouteChanged(NavigationEvent::new(
                RouteDescriptor::named("Leads", "/crm/leads"),
                NavigationSource::Router
            )))
        );
        let signal = translate(&binding(r#"{"kind":"route","name":null,"path":"/x"}"#), "hook");
        assert!(matches!(
            signal,
            Some(HostSignal::RouteChanged(NavigationEvent { route: RouteDescriptor { name: None, .. }, .. }))
        ));
    }

    #[test]
    fn history_and_teardown() {
        assert_eq!(
            translate(&binding(r#"{"kind":"history","path":"/leads"}"#), "hook"),
            Some(HostSignal::HistoryNavigated {
                path: "/leads".into()
            })
        );
        assert_eq!(
            translate(&binding(r#"{"kind":"teardown"}"#), "hook"),
            Some(HostSignal::Teardown)
        );
    }

    #[test]
    fn foreign_bindings_and_garbage_are_ignored() {
        let other = RawEvent::BindingCalled {
            page: PageId::new(),
            name: "somethingElse".into(),
            payload: r#"{"kind":"teardown"}"#.into(),
        };
        assert_eq!(translate(&other, "hook"), None);
        assert_eq!(translate(&binding("not json"), "hook"), None);
        assert_eq!(translate(&binding(r#"{"kind":"resize"}"#), "hook"), None);
    }

    #[test]
    fn document_level_events() {
        let page = PageId::new();
        assert_eq!(
            translate(
                &RawEvent::PageNavigated {
                    page,
                    url: "https://crm.example/crm/leads".into(),
                    ts: 0
                },
                "hook"
            ),
            Some(HostSignal::DocumentReplaced {
                url: "https://crm.example/crm/leads".into()
            })
        );
        assert_eq!(
            translate(
                &RawEvent::SameDocumentNavigated {
                    page,
                    url: "https://crm.example/crm/deals?tab=open#top".into(),
                    ts: 0
                },
                "hook"
            ),
            Some(HostSignal::HistoryNavigated {
                path: "/crm/deals".into()
            })
        );
        assert_eq!(
            translate(
                &RawEvent::PageReattached {
                    page,
                    url: "https://crm.example/crm/leads".into()
                },
                "hook"
            ),
            Some(HostSignal::DocumentReplaced {
                url: "https://crm.example/crm/leads".into()
            })
        );
        assert_eq!(
            translate(
                &RawEvent::PageClosed {
                    page,
                    reason: "target destroyed".into()
                },
                "hook"
            ),
            Some(HostSignal::Teardown)
        );
    }
}
