mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::*;
use serde_json::{json, Value};
use soulbrowser_dom::config::DEFAULT_UTILITY_WORLD;
use soulbrowser_dom::{FrameEvent, FrameId, FrameManager, JsValue, WorldKind};
use tokio::sync::broadcast;

fn drain(events: &mut broadcast::Receiver<FrameEvent>) -> Vec<(&'static str, String)> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push((event.kind(), event.frame().id().to_string()));
    }
    seen
}

fn evaluated_in(browser: &MockBrowser) -> Vec<i64> {
    browser
        .commands_named("Runtime.evaluate")
        .iter()
        .filter_map(|params| params["contextId"].as_i64())
        .collect()
}

fn frame_ids(manager: &FrameManager) -> Vec<String> {
    let mut ids: Vec<String> = manager
        .frames()
        .iter()
        .map(|frame| frame.id().to_string())
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn detaching_a_parent_removes_the_subtree_innermost_first() {
    let (_browser, manager) = setup();
    boot_main_frame(&manager).await;
    attach_child(&manager, "parent", "main", 3).await;
    attach_child(&manager, "child", "parent", 4).await;
    assert_eq!(frame_ids(&manager), vec!["child", "main", "parent"]);

    let child = manager.frame(&FrameId::from("child")).unwrap();
    assert_eq!(
        child.parent_frame().map(|frame| frame.id().to_string()).as_deref(),
        Some("parent")
    );

    let mut events = manager.subscribe();
    manager.handle_event(frame_detached("parent", None)).await;

    assert_eq!(frame_ids(&manager), vec!["main"]);
    assert!(child.is_detached());
    assert!(child.main_world().is_detached());
    assert!(manager.main_frame().unwrap().child_frames().is_empty());
    assert_eq!(
        drain(&mut events),
        vec![
            ("frame_detached", "child".to_string()),
            ("frame_detached", "parent".to_string()),
        ]
    );
}

#[tokio::test]
async fn swap_detach_keeps_the_frame() {
    let (_browser, manager) = setup();
    boot_main_frame(&manager).await;
    attach_child(&manager, "oopif", "main", 3).await;

    manager
        .handle_event(frame_detached("oopif", Some("swap")))
        .await;
    assert!(manager.frame(&FrameId::from("oopif")).is_some());

    manager
        .handle_event(frame_detached("oopif", Some("remove")))
        .await;
    assert!(manager.frame(&FrameId::from("oopif")).is_none());
}

#[tokio::test]
async fn attaching_under_an_unknown_parent_is_ignored() {
    let (_browser, manager) = setup();
    boot_main_frame(&manager).await;
    manager.handle_event(frame_attached("orphan", "nowhere")).await;
    manager
        .handle_event(frame_navigated("orphan", Some("nowhere"), MAIN_URL))
        .await;
    assert_eq!(frame_ids(&manager), vec!["main"]);
}

#[tokio::test]
async fn main_frame_keeps_identity_across_id_swaps() {
    let (_browser, manager) = setup();
    boot_main_frame(&manager).await;
    attach_child(&manager, "ad", "main", 3).await;
    let main = manager.main_frame().unwrap();
    let ad = manager.frame(&FrameId::from("ad")).unwrap();

    let mut events = manager.subscribe();
    manager
        .handle_event(frame_navigated("main-2", None, "https://other.test/"))
        .await;

    let swapped = manager.main_frame().unwrap();
    assert!(Arc::ptr_eq(&main, &swapped));
    assert_eq!(swapped.id().as_str(), "main-2");
    assert_eq!(swapped.url(), "https://other.test/");
    assert_eq!(swapped.loader_id(), "loader-main-2");
    assert!(manager.frame(&FrameId::from("main")).is_none());
    assert!(ad.is_detached());
    assert_eq!(frame_ids(&manager), vec!["main-2"]);
    assert_eq!(
        drain(&mut events),
        vec![
            ("frame_detached", "ad".to_string()),
            ("frame_navigated", "main-2".to_string()),
        ]
    );
}

#[tokio::test]
async fn navigation_keeps_the_url_fragment() {
    let (_browser, manager) = setup();
    manager
        .handle_event(cdp_adapter::TransportEvent::new(
            "Page.frameNavigated",
            json!({
                "frame": {
                    "id": "main",
                    "loaderId": "l1",
                    "name": "top",
                    "url": "https://example.test/app",
                    "urlFragment": "#step-2"
                }
            }),
        ))
        .await;
    let main = manager.main_frame().unwrap();
    assert_eq!(main.name(), "top");
    assert_eq!(main.url(), "https://example.test/app#step-2");
}

#[tokio::test]
async fn realms_bind_to_the_matching_world() {
    let (_browser, manager) = setup();
    boot_main_frame(&manager).await;
    let main = manager.main_frame().unwrap();

    let page = main.main_world().current_context().unwrap();
    let utility = main.secondary_world().current_context().unwrap();
    assert_eq!(page.id().0, 1);
    assert_eq!(utility.id().0, 2);
    assert_eq!(utility.name(), DEFAULT_UTILITY_WORLD);
    assert_eq!(page.origin(), MAIN_URL);
    assert!(Arc::ptr_eq(&page.frame().unwrap(), &main));
    assert_eq!(utility.world().unwrap().kind(), WorldKind::Secondary);

    // A second utility realm for the same frame does not replace the first.
    manager
        .handle_event(context_created(5, "main", false, DEFAULT_UTILITY_WORLD, "isolated"))
        .await;
    assert_eq!(main.secondary_world().current_context().unwrap().id().0, 2);
    let extra = manager.execution_context(soulbrowser_dom::ExecutionContextId(5)).unwrap();
    assert!(extra.world().is_none());
    assert!(Arc::ptr_eq(&extra.frame().unwrap(), &main));

    // Realms for other isolated worlds belong to the frame but to no world.
    manager
        .handle_event(context_created(6, "main", false, "extension", "isolated"))
        .await;
    assert_eq!(manager.execution_context_count(), 4);
    assert!(manager
        .execution_context(soulbrowser_dom::ExecutionContextId(6))
        .unwrap()
        .world()
        .is_none());
}

#[tokio::test]
async fn destroyed_realms_unbind() {
    let (_browser, manager) = setup();
    boot_main_frame(&manager).await;
    let main = manager.main_frame().unwrap();

    manager.handle_event(context_destroyed(1)).await;
    assert!(!main.main_world().has_context());
    assert!(main.secondary_world().has_context());
    assert_eq!(manager.execution_context_count(), 1);

    manager.handle_event(context_created(3, "main", true, "", "default")).await;
    assert_eq!(main.main_world().current_context().unwrap().id().0, 3);

    manager.handle_event(contexts_cleared()).await;
    assert!(!main.main_world().has_context());
    assert!(!main.secondary_world().has_context());
    assert_eq!(manager.execution_context_count(), 0);
}

#[tokio::test]
async fn destroying_a_stale_realm_leaves_the_new_binding() {
    let (_browser, manager) = setup();
    boot_main_frame(&manager).await;
    let main = manager.main_frame().unwrap();
    manager.handle_event(context_created(3, "main", true, "", "default")).await;
    manager.handle_event(context_destroyed(1)).await;
    assert_eq!(main.main_world().current_context().unwrap().id().0, 3);
}

#[tokio::test]
async fn pending_context_callers_wake_on_bind() {
    let (_browser, manager) = setup();
    manager
        .handle_event(frame_navigated("main", None, MAIN_URL))
        .await;
    let world = Arc::clone(manager.main_frame().unwrap().main_world());
    let waiter = tokio::spawn(async move { world.execution_context().await });
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    manager.handle_event(context_created(7, "main", true, "", "default")).await;
    let context = waiter.await.unwrap().unwrap();
    assert_eq!(context.id().0, 7);
}

#[tokio::test]
async fn same_document_navigation_emits_both_events() {
    let (_browser, manager) = setup();
    boot_main_frame(&manager).await;
    let mut events = manager.subscribe();
    manager
        .handle_event(navigated_within_document("main", "https://example.test/#about"))
        .await;
    assert_eq!(
        manager.main_frame().unwrap().url(),
        "https://example.test/#about"
    );
    assert_eq!(
        drain(&mut events),
        vec![
            ("frame_navigated_within_document", "main".to_string()),
            ("frame_navigated", "main".to_string()),
        ]
    );
    // Realms survive same-document navigations.
    assert!(manager.main_frame().unwrap().main_world().has_context());
}

#[tokio::test]
async fn lifecycle_events_track_the_current_document() {
    let (_browser, manager) = setup();
    boot_main_frame(&manager).await;
    let main = manager.main_frame().unwrap();
    let mut events = manager.subscribe();

    manager.handle_event(lifecycle_event("main", "l1", "init")).await;
    manager
        .handle_event(lifecycle_event("main", "l1", "DOMContentLoaded"))
        .await;
    assert_eq!(main.loader_id(), "l1");
    assert!(main.has_lifecycle_event("DOMContentLoaded"));

    manager.handle_event(lifecycle_event("main", "l2", "init")).await;
    assert_eq!(main.lifecycle_events(), vec!["init".to_string()]);
    assert_eq!(main.loader_id(), "l2");

    manager.handle_event(frame_stopped_loading("main")).await;
    assert!(main.has_lifecycle_event("load"));
    assert!(main.has_lifecycle_event("DOMContentLoaded"));

    let kinds: Vec<_> = drain(&mut events).into_iter().map(|(kind, _)| kind).collect();
    assert_eq!(kinds, vec!["lifecycle"; 5]);
}

#[tokio::test]
async fn malformed_events_are_skipped() {
    let (_browser, manager) = setup();
    manager
        .handle_event(cdp_adapter::TransportEvent::new(
            "Page.frameNavigated",
            json!({ "frame": 42 }),
        ))
        .await;
    manager
        .handle_event(cdp_adapter::TransportEvent::new("Network.requestWillBeSent", json!({})))
        .await;
    assert!(manager.main_frame().is_none());
    boot_main_frame(&manager).await;
    assert!(manager.main_frame().is_some());
}

#[tokio::test]
async fn initialize_loads_the_tree_and_installs_the_utility_world() {
    let (browser, manager) = setup();
    browser.respond_with(|method, params| match method {
        "Page.getFrameTree" => Reply::Now(Ok(json!({
            "frameTree": {
                "frame": { "id": "main", "loaderId": "l1", "url": MAIN_URL },
                "childFrames": [
                    { "frame": { "id": "ad", "parentId": "main", "loaderId": "l2", "url": "https://ads.test/" } }
                ]
            }
        }))),
        _ => default_reply(method, params),
    });
    tokio_test::assert_ok!(manager.initialize().await);

    let methods: Vec<String> = browser.commands().into_iter().map(|(method, _)| method).collect();
    assert_eq!(
        methods,
        vec![
            "Page.enable",
            "Page.getFrameTree",
            "Page.setLifecycleEventsEnabled",
            "Runtime.enable",
            "Page.addScriptToEvaluateOnNewDocument",
            "Page.createIsolatedWorld",
            "Page.createIsolatedWorld",
        ]
    );
    assert_eq!(frame_ids(&manager), vec!["ad", "main"]);
    let ad = manager.frame(&FrameId::from("ad")).unwrap();
    assert_eq!(ad.parent_frame().unwrap().id().as_str(), "main");
    assert_eq!(ad.url(), "https://ads.test/");

    let created = browser.commands_named("Page.createIsolatedWorld");
    assert!(created
        .iter()
        .all(|params| params["worldName"] == json!(DEFAULT_UTILITY_WORLD)));
    assert_eq!(
        browser.commands_named("Page.addScriptToEvaluateOnNewDocument")[0]["worldName"],
        json!(DEFAULT_UTILITY_WORLD)
    );
}

#[tokio::test]
async fn isolated_worlds_are_installed_once() {
    let (browser, manager) = setup();
    manager
        .handle_event(frame_navigated("main", None, MAIN_URL))
        .await;
    manager.ensure_isolated_world("tools").await.unwrap();
    manager.ensure_isolated_world("tools").await.unwrap();
    assert_eq!(browser.commands_named("Page.addScriptToEvaluateOnNewDocument").len(), 1);
    assert_eq!(browser.commands_named("Page.createIsolatedWorld").len(), 1);

    // Worlds the page already reported are not installed again.
    manager
        .handle_event(context_created(9, "main", false, "seen", "isolated"))
        .await;
    manager.ensure_isolated_world("seen").await.unwrap();
    assert_eq!(browser.commands_named("Page.addScriptToEvaluateOnNewDocument").len(), 1);
}

#[tokio::test]
async fn failed_install_can_be_retried() {
    let (browser, manager) = setup();
    browser.respond_with(|method, params| match method {
        "Page.addScriptToEvaluateOnNewDocument" => Reply::Now(Err(
            cdp_adapter::AdapterError::protocol("Target closed"),
        )),
        _ => default_reply(method, params),
    });
    assert!(manager.ensure_isolated_world("tools").await.is_err());
    browser.respond_with(default_reply);
    manager.ensure_isolated_world("tools").await.unwrap();
    assert_eq!(browser.commands_named("Page.addScriptToEvaluateOnNewDocument").len(), 2);
}

#[tokio::test]
async fn event_loop_applies_events_for_its_session() {
    let (browser, manager) = setup();
    Arc::clone(&manager).start().await.unwrap();
    Arc::clone(&manager).start().await.unwrap();
    assert!(browser.started());

    browser.push_event(frame_navigated("main", None, MAIN_URL));
    browser.push_event(context_created(1, "main", true, "", "default"));
    browser.push_event(
        frame_attached("foreign", "main").for_session("another-target"),
    );
    let observed = Arc::clone(&manager);
    assert!(
        eventually(move || observed
            .main_frame()
            .is_some_and(|frame| frame.main_world().has_context()))
        .await
    );
    assert_eq!(frame_ids(&manager), vec!["main"]);

    browser.close();
    let observed = Arc::clone(&manager);
    assert!(eventually(move || observed.execution_context_count() == 0).await);
    assert!(!manager.main_frame().unwrap().main_world().has_context());
    manager.shutdown().await;
}

#[tokio::test]
async fn shutdown_stops_the_loop() {
    let (browser, manager) = setup();
    Arc::clone(&manager).start().await.unwrap();
    manager.shutdown().await;
    browser.push_event(frame_navigated("main", None, MAIN_URL));
    tokio::task::yield_now().await;
    assert!(manager.main_frame().is_none());
}

#[tokio::test]
async fn frames_evaluate_in_their_own_realms() {
    let (browser, manager) = setup();
    let globals: Arc<parking_lot::Mutex<HashMap<i64, Value>>> = Arc::default();
    let store = Arc::clone(&globals);
    browser.respond_with(move |method, params| match method {
        "Runtime.callFunctionOn" => {
            let context = params["executionContextId"].as_i64().unwrap_or_default();
            store
                .lock()
                .insert(context, params["arguments"][0]["value"].clone());
            result(json!({ "type": "undefined" }))
        }
        "Runtime.evaluate" => {
            let context = params["contextId"].as_i64().unwrap_or_default();
            match store.lock().get(&context) {
                Some(value) => result(remote_value(value.clone())),
                None => result(json!({ "type": "undefined" })),
            }
        }
        _ => default_reply(method, params),
    });
    boot_main_frame(&manager).await;
    attach_child(&manager, "child", "main", 3).await;

    let main = manager.main_frame().unwrap();
    let child = manager.frame(&FrameId::from("child")).unwrap();
    main.evaluate_function_value("value => { window.X = value }", vec![42i64.into()])
        .await
        .unwrap();

    assert_eq!(
        main.evaluate_expression_value("window.X").await.unwrap(),
        JsValue::Number(42.0)
    );
    assert_eq!(
        child.evaluate_expression_value("window.X").await.unwrap(),
        JsValue::Undefined
    );
    assert_eq!(globals.lock().len(), 1);
}

#[tokio::test]
async fn documents_are_cached_per_realm() {
    let (browser, manager) = setup();
    browser.respond_with(|method, params| match method {
        "Runtime.evaluate" => {
            let context = params["contextId"].as_i64().unwrap_or_default();
            result(node(&format!("document-{context}"), "HTMLDocument"))
        }
        _ => default_reply(method, params),
    });
    boot_main_frame(&manager).await;
    let world = Arc::clone(manager.main_frame().unwrap().main_world());
    let first = world.document().await.unwrap();
    let second = world.document().await.unwrap();
    assert!(first.context().ptr_eq(second.context()));
    assert_eq!(evaluated_in(&browser), vec![1]);

    manager
        .handle_event(context_created(9, "main", true, "", "default"))
        .await;
    let rebound = world.document().await.unwrap();
    assert_eq!(rebound.context().id().0, 9);
    assert_eq!(evaluated_in(&browser), vec![1, 9]);
    world.document().await.unwrap();
    assert_eq!(evaluated_in(&browser), vec![1, 9]);
}

#[tokio::test]
async fn realms_without_a_frame_belong_to_no_world() {
    let (_browser, manager) = setup();
    boot_main_frame(&manager).await;
    manager
        .handle_event(cdp_adapter::TransportEvent::new(
            "Runtime.executionContextCreated",
            json!({ "context": { "id": 11, "origin": "", "name": "worker" } }),
        ))
        .await;

    let worker = manager
        .execution_context(soulbrowser_dom::ExecutionContextId(11))
        .unwrap();
    assert!(worker.world().is_none());
    assert!(worker.frame().is_none());
    assert_eq!(manager.execution_context_count(), 3);

    let main = manager.main_frame().unwrap();
    assert_eq!(main.main_world().current_context().unwrap().id().0, 1);
    assert_eq!(main.secondary_world().current_context().unwrap().id().0, 2);
}
