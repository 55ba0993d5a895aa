//! Control page served at `/`

/// Renders the control page for a stream reachable at `host:stream_port`
///
/// Relay buttons pulse their relay: one toggle on press, a second toggle
/// after the number of seconds printed on the button.
pub fn render(host: &str, stream_port: u16) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>RelayCam</title>
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>
        * {{
            user-select: none;
            text-align: center;
            font-weight: bolder;
            margin: 5px;
        }}
        body {{
            background-color: rgba(0, 0, 0, 0.777);
        }}
        h1 {{
            color: whitesmoke;
        }}
        .stream {{
            width: 370px;
        }}
        .relay {{
            width: 90px;
            height: 80px;
            background-color: lightgrey;
            border-radius: 10px;
        }}
        .led {{
            width: 140px;
            height: 40px;
            background-color: yellow;
            border-radius: 5px;
        }}
    </style>
</head>
<body>
    <h1>RelayCam</h1>
    <p><img class="stream" src="http://{host}:{stream_port}/stream"></p>
    <br/>
    <button class="relay" value="r1">1 seconds</button><br>
    <button class="relay" value="r3">3 seconds</button>
    <button class="relay" value="r5">5 seconds</button><br>
    <button class="relay" value="r7">7 seconds</button><br>
    <button class="led" value="ledon">Light ON</button>
    <button class="led" value="ledoff">Light OFF</button><br>
    <script>
        const timers = {{}};

        function send(path) {{
            fetch('/' + path + '?' + Date.now()).catch(() => {{}});
        }}

        function press() {{
            const path = this.value;
            if (path[0] === 'r') {{
                clearTimeout(timers[path]);
                timers[path] = setTimeout(() => send(path), parseInt(path.slice(1)) * 1000);
            }}
            send(path);
        }}

        const touch = !((window.screen.height > 700) && (window.screen.width > 600));
        for (const btn of document.getElementsByTagName('button')) {{
            btn.addEventListener(touch ? 'touchstart' : 'mousedown', press);
        }}
    </script>
</body>
</html>"#,
        host = host,
        stream_port = stream_port
    )
}
