//! Browser chat client served over the messenger WebSocket transport.
//!
//! Run with: cargo run -p web-chat-demo
//!
//! Then open http://localhost:3000 in two browser windows.

use anyhow::Context;
use axum::{Router, response::Html, routing::get};
use messenger_chat::{ChatConfig, open_backend};
use messenger_transport::websocket::{ChatHub, create_ws_router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ChatConfig::from_env();
    let backend = open_backend(&config)
        .await
        .with_context(|| format!("failed to open {} backend", config.backend))?;
    tracing::info!(backend = %config.backend, data_dir = %config.data_dir.display(), "backend ready");

    let addr = config.http_addr;
    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(ChatHub::new(backend, config)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server listening on http://{addr}");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8" />
    <title>Duet Messenger</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
        .hidden { display: none; }
        input, button { font-size: 14px; padding: 6px; margin: 2px; }
        #messages {
            height: calc(100vh - 300px);
            overflow-y: auto;
            border: 1px solid #333;
            padding: 8px;
        }
        .msg { margin: 4px 0; max-width: 70%; padding: 6px 10px; border-radius: 8px; background: #2d2d2d; }
        .msg.mine { margin-left: auto; background: #264f78; }
        .msg .time { font-size: 11px; color: #999; margin-left: 8px; }
        .msg.rich .body { font-size: 32px; }
        #error { color: #e66; min-height: 20px; }
        #stickers button { font-size: 20px; }
    </style>
</head>
<body>
    <h1>Duet Messenger</h1>
    <div class="status" id="status">Connecting...</div>
    <div id="error"></div>

    <div id="auth">
        <input id="handle" placeholder="Handle" />
        <input id="secret" type="password" placeholder="Password" />
        <input id="avatar" placeholder="Avatar URL (new accounts)" />
        <button id="enter">Enter</button>
    </div>

    <div id="app" class="hidden">
        <div>
            Signed in as <b id="me"></b>
            <button id="logout">Log out</button>
        </div>
        <div>
            <input id="search" placeholder="Find a contact" />
            <button id="found" class="hidden"></button>
        </div>
        <h3 id="partner">No conversation</h3>
        <div id="messages"></div>
        <div id="stickers"></div>
        <input id="body" placeholder="Message" size="60" />
        <button id="send">Send</button>
    </div>

    <script>
        const STICKERS = ['🔥', '😂', '❤️', '👍', '🚀', '💀', '🤡', '🍕', '🌈', '💎'];
        const $ = (id) => document.getElementById(id);
        const status = $('status');
        let ws;
        let me = null;
        let partner = null;

        function send(msg) {
            if (ws && ws.readyState === WebSocket.OPEN) {
                ws.send(JSON.stringify(msg));
            }
        }

        function hhmm(iso) {
            const d = new Date(iso);
            return d.toTimeString().slice(0, 5);
        }

        function render(messages) {
            const box = $('messages');
            box.innerHTML = '';
            for (const m of messages) {
                const div = document.createElement('div');
                div.className = 'msg' + (m.sender === me ? ' mine' : '') + (m.isRich ? ' rich' : '');
                const body = document.createElement('span');
                body.className = 'body';
                body.textContent = m.body;
                const time = document.createElement('span');
                time.className = 'time';
                time.textContent = hhmm(m.sentAt);
                div.append(body, time);
                box.appendChild(div);
            }
            box.scrollTop = box.scrollHeight;
        }

        function signedIn(session) {
            me = session.handle;
            $('me').textContent = me;
            $('auth').classList.add('hidden');
            $('app').classList.remove('hidden');
        }

        function signedOut() {
            me = null;
            partner = null;
            $('auth').classList.remove('hidden');
            $('app').classList.add('hidden');
            $('messages').innerHTML = '';
            $('partner').textContent = 'No conversation';
        }

        function handle(msg) {
            $('error').textContent = '';
            switch (msg.type) {
                case 'auth_ok': signedIn(msg.session); break;
                case 'auth_failed': $('error').textContent = msg.message; break;
                case 'logged_out': signedOut(); break;
                case 'conversation_opened':
                    partner = msg.partner;
                    $('partner').textContent = partner;
                    break;
                case 'partner_profile':
                    $('partner').textContent = msg.profile.handle;
                    break;
                case 'conversation_update':
                    if (msg.partner === partner) render(msg.messages);
                    break;
                case 'sent':
                    if (!msg.message.isRich) $('body').value = '';
                    break;
                case 'search_result': {
                    const btn = $('found');
                    if (msg.hit) {
                        btn.textContent = msg.hit.handle + (msg.hit.registered ? '' : ' (not registered)');
                        btn.dataset.handle = msg.hit.handle;
                        btn.classList.remove('hidden');
                    } else {
                        btn.classList.add('hidden');
                    }
                    break;
                }
                case 'error': $('error').textContent = msg.message; break;
            }
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onopen = () => {
                status.textContent = 'Connected';
                status.className = 'status connected';
            };

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status disconnected';
                signedOut();
                setTimeout(connect, 2000);
            };

            ws.onmessage = (event) => {
                try {
                    handle(JSON.parse(event.data));
                } catch (e) {
                    console.error('Failed to parse message:', e);
                }
            };
        }

        $('enter').onclick = () => send({
            type: 'authenticate',
            handle: $('handle').value,
            secret: $('secret').value,
            avatar_ref: $('avatar').value,
        });
        $('logout').onclick = () => send({ type: 'logout' });
        $('search').oninput = () => send({ type: 'search', query: $('search').value });
        $('found').onclick = () => send({ type: 'open', partner: $('found').dataset.handle });
        $('send').onclick = () => send({ type: 'send', body: $('body').value });
        $('body').onkeydown = (e) => { if (e.key === 'Enter') $('send').onclick(); };

        for (const s of STICKERS) {
            const b = document.createElement('button');
            b.textContent = s;
            b.onclick = () => send({ type: 'sticker', sticker: s });
            $('stickers').appendChild(b);
        }

        connect();
    </script>
</body>
</html>
"#;
