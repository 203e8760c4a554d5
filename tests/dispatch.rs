//! Request lifecycle tests driven through the dispatcher.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{call, config, dispatch, get, post, request, text};
use serde_json::json;

use switchyard::http::{RequestBody, RequestContext, ViewRenderer};
use switchyard::observability::{RequestStat, ResponseStat};
use switchyard::routing::{authorizer, partial, Authorization};
use switchyard::{handler, AppError, Application, DispatchError, RouteOptions};

fn echo(text: &'static str) -> switchyard::routing::Handler {
    handler(move |ctl, _| async move {
        ctl.plain(text);
        Ok(())
    })
}

#[tokio::test]
async fn test_literal_route_beats_capture() {
    let app = Application::builder(config())
        .route(
            "/users/{id}/",
            handler(|ctl, params| async move {
                ctl.plain(format!("user {}", params.get(0).unwrap_or_default()));
                Ok(())
            }),
            RouteOptions::new(),
        )
        .route("/users/me/", echo("me"), RouteOptions::new())
        .build()
        .unwrap();

    assert_eq!(call(&app, get("/users/me/")).await, (200, "me".to_string()));
    assert_eq!(call(&app, get("/Users/Ann")).await, (200, "user Ann".to_string()));
}

#[tokio::test]
async fn test_unknown_path_falls_back_to_404() {
    let app = Application::builder(config())
        .route("/", echo("home"), RouteOptions::new())
        .build()
        .unwrap();

    let (status, body) = call(&app, get("/missing/")).await;
    assert_eq!(status, 404);
    assert_eq!(body, "404: Not Found");
    assert_eq!(app.stats().response_count(ResponseStat::Error404), 1);
}

#[tokio::test]
async fn test_custom_system_route_keeps_status() {
    let app = Application::builder(config())
        .route("#404", echo("nothing here"), RouteOptions::new())
        .build()
        .unwrap();

    assert_eq!(call(&app, get("/missing/")).await, (404, "nothing here".to_string()));
}

#[tokio::test]
async fn test_json_route_receives_parsed_body() {
    let app = Application::builder(config())
        .route(
            "/api/echo/",
            handler(|ctl, _| async move {
                let body = ctl.context().json().cloned().unwrap_or_default();
                ctl.json(&json!({ "echo": body }))?;
                Ok(())
            }),
            RouteOptions::new().flags(["json"]),
        )
        .build()
        .unwrap();

    let (status, body) = call(&app, post("/api/echo/", "application/json", r#"{"a":1}"#)).await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"echo":{"a":1}}"#);
    assert_eq!(app.stats().request_count(RequestStat::Post), 1);

    let (status, _) = call(&app, post("/api/echo/", "application/json", "not json")).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_urlencoded_form_fields() {
    let app = Application::builder(config())
        .route(
            "/form/",
            handler(|ctl, _| async move {
                let name = ctl.context().field("name").unwrap_or("?").to_string();
                ctl.plain(name);
                Ok(())
            }),
            RouteOptions::new().flags(["post"]),
        )
        .build()
        .unwrap();

    let form = post("/form/", "application/x-www-form-urlencoded", "name=ann&x=1");
    assert_eq!(call(&app, form).await, (200, "ann".to_string()));

    let (status, _) = call(&app, post("/form/", "text/plain", "name=ann")).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_raw_route_keeps_text() {
    let app = Application::builder(config())
        .route(
            "/raw/",
            handler(|ctl, _| async move {
                let text = match ctl.context().body() {
                    RequestBody::Raw(text) => text.clone(),
                    other => format!("{:?}", other),
                };
                ctl.plain(text);
                Ok(())
            }),
            RouteOptions::new().flags(["raw"]),
        )
        .build()
        .unwrap();

    assert_eq!(
        call(&app, post("/raw/", "text/plain", "hello")).await,
        (200, "hello".to_string())
    );
}

#[tokio::test]
async fn test_oversized_body_answers_431() {
    let app = Application::builder(config())
        .route(
            "/api/echo/",
            handler(|_, _| async move {
                if true {
                    panic!("handler must not run");
                }
                Ok(())
            }),
            RouteOptions::new().flags(["json"]).max_size(8),
        )
        .build()
        .unwrap();

    let body = format!(r#"{{"data":"{}"}}"#, "x".repeat(64));
    let (status, _) = call(&app, post("/api/echo/", "application/json", body)).await;
    assert_eq!(status, 431);
    assert_eq!(app.stats().response_count(ResponseStat::Error431), 1);
}

#[tokio::test]
async fn test_post_without_body_routes_is_dropped() {
    let app = Application::builder(config())
        .route("/", echo("home"), RouteOptions::new())
        .build()
        .unwrap();

    let result = dispatch(&app, post("/", "application/json", "{}")).await;
    assert!(matches!(result, Err(DispatchError::Blocked { .. })));
    assert_eq!(app.stats().request_count(RequestStat::Blocked), 1);
}

#[tokio::test]
async fn test_unsupported_method_is_dropped() {
    let app = Application::builder(config())
        .route("/", echo("home"), RouteOptions::new())
        .build()
        .unwrap();

    let result = dispatch(&app, request("PATCH", "/", "text/plain", "x")).await;
    assert!(matches!(result, Err(DispatchError::Blocked { .. })));
}

#[tokio::test]
async fn test_head_request_is_dropped() {
    let app = Application::builder(config())
        .route("/", echo("home"), RouteOptions::new())
        .build()
        .unwrap();

    let result = dispatch(&app, request("HEAD", "/", "text/plain", "")).await;
    assert!(matches!(result, Err(DispatchError::Blocked { .. })));
    assert_eq!(app.stats().request_count(RequestStat::Blocked), 1);
    assert_eq!(app.stats().request_count(RequestStat::Get), 0);
}

#[tokio::test]
async fn test_route_filter_drops_rejected_requests() {
    let app = Application::builder(config())
        .route_filter(Arc::new(|ctx: &RequestContext| !ctx.path().starts_with("/private")))
        .route("/", echo("home"), RouteOptions::new())
        .route("/private/", echo("secret"), RouteOptions::new())
        .build()
        .unwrap();

    let result = dispatch(&app, get("/private/")).await;
    assert!(matches!(result, Err(DispatchError::Blocked { .. })));
    assert_eq!(app.stats().request_count(RequestStat::Blocked), 1);
    assert_eq!(app.stats().pending(), 0);

    assert_eq!(call(&app, get("/")).await, (200, "home".to_string()));
}

#[tokio::test]
async fn test_panicking_route_filter_answers_500() {
    let app = Application::builder(config())
        .route_filter(Arc::new(|ctx: &RequestContext| {
            if ctx.path() == "/boom/" {
                panic!("filter failed");
            }
            true
        }))
        .route("/boom/", echo("never"), RouteOptions::new())
        .build()
        .unwrap();

    let (status, body) = call(&app, get("/boom/")).await;
    assert_eq!(status, 500);
    assert_eq!(body, "500: Internal Server Error");
    assert_eq!(app.errors().len(), 1);
    assert_eq!(app.stats().response_count(ResponseStat::Error500), 1);
}

#[tokio::test]
async fn test_handler_error_and_panic_answer_500() {
    let app = Application::builder(config())
        .route(
            "/fail/",
            handler(|_, _| async move { Err(AppError::msg("boom")) }),
            RouteOptions::new(),
        )
        .route(
            "/panic/",
            handler(|_, _| async move {
                if true {
                    panic!("exploded");
                }
                Ok(())
            }),
            RouteOptions::new(),
        )
        .route(
            "/todo/",
            handler(|_, _| async move { Err(AppError::NotImplemented) }),
            RouteOptions::new(),
        )
        .build()
        .unwrap();

    assert_eq!(call(&app, get("/fail/")).await.0, 500);
    assert_eq!(call(&app, get("/panic/")).await.0, 500);
    assert_eq!(call(&app, get("/todo/")).await.0, 501);
    assert_eq!(app.errors().len(), 3);
}

#[tokio::test]
async fn test_failing_500_route_still_answers() {
    let app = Application::builder(config())
        .route(
            "/fail/",
            handler(|_, _| async move { Err(AppError::msg("first")) }),
            RouteOptions::new(),
        )
        .route(
            "#500",
            handler(|_, _| async move { Err(AppError::msg("second")) }),
            RouteOptions::new(),
        )
        .build()
        .unwrap();

    let (status, body) = call(&app, get("/fail/")).await;
    assert_eq!(status, 500);
    assert_eq!(body, "500: Internal Server Error");
    assert_eq!(app.errors().len(), 2);
}

#[tokio::test]
async fn test_timeout_answers_408_once() {
    let late_write = Arc::new(AtomicBool::new(true));
    let seen = Arc::clone(&late_write);

    let app = Application::builder(config())
        .route(
            "/slow/",
            handler(move |ctl, _| {
                let seen = Arc::clone(&seen);
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    seen.store(ctl.plain("late"), Ordering::SeqCst);
                    Ok(())
                }
            }),
            RouteOptions::new().timeout(Duration::from_millis(30)),
        )
        .build()
        .unwrap();

    let (status, body) = call(&app, get("/slow/")).await;
    assert_eq!(status, 408);
    assert_eq!(body, "408: Request Timeout");
    assert_eq!(app.stats().response_count(ResponseStat::Timeout), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!late_write.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_timed_out_handler_stops_running() {
    let resumed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&resumed);

    let app = Application::builder(config())
        .route(
            "/stuck/",
            handler(move |_, _| {
                let flag = Arc::clone(&flag);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
            RouteOptions::new().timeout(Duration::from_millis(20)),
        )
        .build()
        .unwrap();

    assert_eq!(call(&app, get("/stuck/")).await.0, 408);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!resumed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_second_write_is_ignored() {
    let app = Application::builder(config())
        .route(
            "/twice/",
            handler(|ctl, _| async move {
                assert!(ctl.plain("first"));
                assert!(!ctl.plain("second"));
                Ok(())
            }),
            RouteOptions::new(),
        )
        .build()
        .unwrap();

    assert_eq!(call(&app, get("/twice/")).await, (200, "first".to_string()));
}

#[tokio::test]
async fn test_partials_finish_before_handler() {
    let ready = Arc::new(AtomicBool::new(false));
    let set = Arc::clone(&ready);
    let check = Arc::clone(&ready);

    let app = Application::builder(config())
        .partial(
            "load",
            partial(move |_| {
                let set = Arc::clone(&set);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    set.store(true, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .route(
            "/page/",
            handler(move |ctl, _| {
                let check = Arc::clone(&check);
                async move {
                    ctl.plain(if check.load(Ordering::SeqCst) { "ready" } else { "early" });
                    Ok(())
                }
            }),
            RouteOptions::new().partials(["load"]),
        )
        .build()
        .unwrap();

    assert_eq!(call(&app, get("/page/")).await, (200, "ready".to_string()));
}

/// Waits until `peers` hooks have started, then finishes after `delay`.
async fn barrier_hook(started: Arc<AtomicUsize>, done: Arc<AtomicUsize>, peers: usize, delay: u64) -> Result<(), AppError> {
    started.fetch_add(1, Ordering::SeqCst);
    for _ in 0..200 {
        if started.load(Ordering::SeqCst) >= peers {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    if started.load(Ordering::SeqCst) < peers {
        return Err(AppError::msg("hooks did not overlap"));
    }
    tokio::time::sleep(Duration::from_millis(delay)).await;
    done.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

#[tokio::test]
async fn test_global_and_route_partials_overlap_before_handler() {
    let started = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    let (global_started, global_done) = (Arc::clone(&started), Arc::clone(&done));
    let (named_started, named_done) = (Arc::clone(&started), Arc::clone(&done));
    let seen = Arc::clone(&done);

    let app = Application::builder(config())
        .global_partial(partial(move |_| {
            barrier_hook(Arc::clone(&global_started), Arc::clone(&global_done), 2, 60)
        }))
        .partial(
            "session",
            partial(move |_| barrier_hook(Arc::clone(&named_started), Arc::clone(&named_done), 2, 10)),
        )
        .route(
            "/page/",
            handler(move |ctl, _| {
                let seen = Arc::clone(&seen);
                async move {
                    ctl.plain(seen.load(Ordering::SeqCst).to_string());
                    Ok(())
                }
            }),
            RouteOptions::new().partials(["session"]),
        )
        .build()
        .unwrap();

    assert_eq!(call(&app, get("/page/")).await, (200, "2".to_string()));
    assert!(app.errors().is_empty());
}

#[tokio::test]
async fn test_responding_partial_skips_handler() {
    let app = Application::builder(config())
        .global_partial(partial(|ctl| async move {
            ctl.plain("from partial");
            Ok(())
        }))
        .route(
            "/page/",
            handler(|_, _| async move {
                if true {
                    panic!("handler must not run");
                }
                Ok(())
            }),
            RouteOptions::new(),
        )
        .build()
        .unwrap();

    assert_eq!(call(&app, get("/page/")).await, (200, "from partial".to_string()));
    assert!(app.errors().is_empty());
}

#[tokio::test]
async fn test_membership_routes_follow_authorization() {
    let app = Application::builder(config())
        .authorizer(authorizer(|ctx: Arc<RequestContext>| async move {
            match ctx.header("authorization") {
                Some("token") => Authorization::logged("alice".to_string()),
                _ => Authorization::unlogged(),
            }
        }))
        .route(
            "/account/",
            handler(|ctl, _| async move {
                let name = ctl.user::<String>().cloned().unwrap_or_default();
                ctl.plain(name);
                Ok(())
            }),
            RouteOptions::new().flags(["logged"]),
        )
        .route("/admin/", echo("admin"), RouteOptions::new().flags(["logged"]))
        .route("/account/", echo("login"), RouteOptions::new().flags(["unlogged"]))
        .build()
        .unwrap();

    let mut signed = get("/account/");
    signed.headers_mut().insert("authorization", "token".parse().unwrap());
    assert_eq!(call(&app, signed).await, (200, "alice".to_string()));

    assert_eq!(call(&app, get("/account/")).await, (200, "login".to_string()));

    let (status, _) = call(&app, get("/admin/")).await;
    assert_eq!(status, 401);
    assert_eq!(app.stats().response_count(ResponseStat::Error401), 1);
}

#[tokio::test]
async fn test_host_redirects() {
    let app = Application::builder(config())
        .redirect("http://old.example.com", "https://new.example.com", true, false)
        .redirect("http://legacy.example.com", "https://new.example.com/", false, true)
        .build()
        .unwrap();

    let mut keep = get("/a/b?x=1");
    keep.headers_mut().insert("host", "old.example.com".parse().unwrap());
    let response = dispatch(&app, keep).await.unwrap();
    assert_eq!(response.status().as_u16(), 302);
    assert_eq!(response.headers()["location"], "https://new.example.com/a/b?x=1");

    let mut drop_path = get("/a/b");
    drop_path.headers_mut().insert("host", "legacy.example.com".parse().unwrap());
    let response = dispatch(&app, drop_path).await.unwrap();
    assert_eq!(response.status().as_u16(), 301);
    assert_eq!(response.headers()["location"], "https://new.example.com");

    assert_eq!(app.stats().response_count(ResponseStat::Forwarding), 2);
}

#[tokio::test]
async fn test_restricted_ip_is_dropped() {
    let mut config = config();
    config.restrictions.blocked_ips = vec![common::peer().ip().to_string()];
    let app = Application::builder(config)
        .route("/", echo("home"), RouteOptions::new())
        .build()
        .unwrap();

    let result = dispatch(&app, get("/")).await;
    assert!(matches!(result, Err(DispatchError::Restricted)));
    assert_eq!(app.stats().response_count(ResponseStat::Restriction), 1);
}

#[tokio::test]
async fn test_reloaded_restrictions_apply_to_next_request() {
    let app = Application::builder(config())
        .route("/", echo("home"), RouteOptions::new())
        .build()
        .unwrap();
    assert_eq!(call(&app, get("/")).await.0, 200);

    let mut next = config();
    next.restrictions.allowed_ips = vec!["10.0.0.1".to_string()];
    app.apply_config(next);

    assert!(matches!(dispatch(&app, get("/")).await, Err(DispatchError::Restricted)));
}

#[tokio::test]
async fn test_file_routes() {
    let app = Application::builder(config())
        .file_route(
            "assets",
            Arc::new(|ctx: &RequestContext| ctx.path().starts_with("/assets/")),
            handler(|ctl, _| async move {
                ctl.content("body{}", "text/css");
                Ok(())
            }),
        )
        .build()
        .unwrap();

    assert_eq!(call(&app, get("/assets/site.css")).await, (200, "body{}".to_string()));
    assert_eq!(call(&app, get("/other/site.css")).await.0, 404);
    assert_eq!(app.stats().request_count(RequestStat::File), 2);
}

#[tokio::test]
async fn test_xss_query_answers_400() {
    let app = Application::builder(config())
        .xss_detector(Arc::new(|value: &str| value.to_lowercase().contains("script")))
        .route("/search/", echo("results"), RouteOptions::new())
        .route("/preview/", echo("preview"), RouteOptions::new().flags(["xss"]))
        .build()
        .unwrap();

    assert_eq!(call(&app, get("/search/?q=%3Cscript%3E")).await.0, 400);
    assert_eq!(
        call(&app, get("/preview/?q=%3Cscript%3E")).await,
        (200, "preview".to_string())
    );
    assert_eq!(call(&app, get("/search/?q=rust")).await.0, 200);
}

#[tokio::test]
async fn test_multipart_upload_fields_and_files() {
    const BODY: &str = "--XYZ\r\n\
        Content-Disposition: form-data; name=\"title\"\r\n\r\n\
        hello\r\n--XYZ\r\n\
        Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
        Content-Type: text/plain\r\n\r\n\
        file body\r\n--XYZ--\r\n";

    let stored = Arc::new(std::sync::Mutex::new(None));
    let path = Arc::clone(&stored);

    let app = Application::builder(config())
        .route(
            "/upload/",
            handler(move |ctl, _| {
                let path = Arc::clone(&path);
                async move {
                    let ctx = ctl.context();
                    let file = &ctx.files()[0];
                    let content = tokio::fs::read_to_string(&file.path).await?;
                    *path.lock().unwrap() = Some(file.path.clone());
                    ctl.plain(format!("{}:{}:{}", ctx.field("title").unwrap_or("?"), file.filename, content));
                    Ok(())
                }
            }),
            RouteOptions::new().flags(["upload"]),
        )
        .build()
        .unwrap();

    let upload = post("/upload/", "multipart/form-data; boundary=XYZ", BODY);
    assert_eq!(call(&app, upload).await, (200, "hello:a.txt:file body".to_string()));

    let file = stored.lock().unwrap().clone().unwrap();
    assert!(common::eventually(|| !file.exists()).await);
}

#[tokio::test]
async fn test_mixed_upload_runs_handler_per_part() {
    let seen = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&seen);

    let app = Application::builder(config())
        .route(
            "/camera/",
            handler(move |ctl, _| {
                let count = Arc::clone(&count);
                async move {
                    assert!(ctl.part().is_some());
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            RouteOptions::new().flags(["mmr"]),
        )
        .build()
        .unwrap();

    let body = "--B\r\nContent-Type: image/jpeg\r\n\r\none\r\n--B\r\nContent-Type: image/jpeg\r\n\r\ntwo\r\n--B--";
    let stream = post("/camera/", "multipart/x-mixed-replace; boundary=B", body);
    assert_eq!(call(&app, stream).await, (200, "END".to_string()));
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_injected_route_serves_next_request() {
    let app = Application::builder(config())
        .route("/", echo("home"), RouteOptions::new())
        .build()
        .unwrap();
    assert_eq!(call(&app, get("/late/")).await.0, 404);

    app.inject(|routes| {
        routes.add_web_route("/late/", echo("late"), RouteOptions::new())?;
        Ok(())
    })
    .unwrap();
    assert_eq!(call(&app, get("/late/")).await, (200, "late".to_string()));

    let failed = app.inject(|routes| {
        routes.add_web_route("/never/", echo("never"), RouteOptions::new())?;
        routes.add_web_route("/bad/{id", echo("bad"), RouteOptions::new())?;
        Ok(())
    });
    assert!(failed.is_err());
    assert_eq!(call(&app, get("/never/")).await.0, 404);
}

#[tokio::test]
async fn test_responses_carry_server_name() {
    let mut config = config();
    config.debug = true;
    let app = Application::builder(config)
        .route("/", echo("home"), RouteOptions::new())
        .build()
        .unwrap();

    let response = dispatch(&app, get("/")).await.unwrap();
    assert_eq!(response.headers()["x-powered-by"], "switchyard");
    assert_eq!(response.headers()["mode"], "debug");
    assert!(response.headers().contains_key("content-type"));
}

fn temp_file(text: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("switchyard-file-{}.txt", uuid::Uuid::new_v4().simple()));
    std::fs::write(&path, text).unwrap();
    path
}

#[tokio::test]
async fn test_file_response_streams_once() {
    let path = temp_file("file contents");
    let served = path.clone();

    let app = Application::builder(config())
        .route(
            "/download/",
            handler(move |ctl, _| {
                let served = served.clone();
                async move {
                    assert!(ctl.file(&served, "text/plain", Some("notes.txt")).await);
                    assert!(!ctl.file(&served, "text/plain", None).await);
                    assert!(!ctl.plain("again"));
                    Ok(())
                }
            }),
            RouteOptions::new(),
        )
        .route(
            "/gone/",
            handler(|ctl, _| async move {
                ctl.file("/nonexistent/switchyard.txt", "text/plain", None).await;
                Ok(())
            }),
            RouteOptions::new(),
        )
        .build()
        .unwrap();

    let response = dispatch(&app, get("/download/")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-disposition"],
        "attachment; filename=\"notes.txt\""
    );
    assert_eq!(text(response).await, "file contents");
    assert_eq!(app.stats().response_count(ResponseStat::File), 1);

    assert_eq!(call(&app, get("/gone/")).await, (404, "404: Not Found".to_string()));
    std::fs::remove_file(&path).unwrap();
}

struct Greeting;

impl ViewRenderer for Greeting {
    fn render(&self, name: &str, model: &serde_json::Value, _ctx: &RequestContext) -> Result<String, AppError> {
        match name {
            "hello" => Ok(format!("<h1>{}</h1>", model["name"].as_str().unwrap_or_default())),
            other => Err(AppError::msg(format!("view {} not found", other))),
        }
    }
}

#[tokio::test]
async fn test_view_renders_through_renderer_once() {
    let app = Application::builder(config())
        .renderer(Arc::new(Greeting))
        .route(
            "/hello/",
            handler(|ctl, _| async move {
                assert!(ctl.view("hello", &json!({ "name": "Ann" }))?);
                assert!(!ctl.view("hello", &json!({ "name": "Bob" }))?);
                Ok(())
            }),
            RouteOptions::new(),
        )
        .route(
            "/missing/",
            handler(|ctl, _| async move {
                ctl.view("nope", &json!({}))?;
                Ok(())
            }),
            RouteOptions::new(),
        )
        .build()
        .unwrap();

    let response = dispatch(&app, get("/hello/")).await.unwrap();
    assert!(response.headers()["content-type"].to_str().unwrap().starts_with("text/html"));
    assert_eq!(text(response).await, "<h1>Ann</h1>");
    assert_eq!(app.stats().response_count(ResponseStat::View), 1);

    assert_eq!(call(&app, get("/missing/")).await.0, 500);
    assert_eq!(app.errors().len(), 1);
}

#[tokio::test]
async fn test_view_without_renderer_answers_500() {
    let app = Application::builder(config())
        .route(
            "/",
            handler(|ctl, _| async move {
                ctl.view("index", &json!({}))?;
                Ok(())
            }),
            RouteOptions::new(),
        )
        .build()
        .unwrap();

    assert_eq!(call(&app, get("/")).await.0, 500);
}
