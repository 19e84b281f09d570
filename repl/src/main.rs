use std::env;
use std::io::{self, Write};
use std::time::Duration;

use driver::OverlayClient;
use overlay_protocol::messages::query::QueryRequest;
use overlay_protocol::messages::response::QueryResponse;
use overlay_protocol::types::DataValue;
use uuid::Uuid;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9001;

fn main() {
    let args: Vec<String> = env::args().collect();
    let host = args.get(1).cloned().unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = args
        .get(2)
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let client = match OverlayClient::new(&host, port) {
        Ok(client) => client.with_io_timeout(Duration::from_secs(10)),
        Err(e) => {
            eprintln!("Failed to resolve the portal at {}:{}: {}", host, port, e);
            return;
        }
    };
    if !client.is_connected() {
        eprintln!("Failed to connect to the portal at {}:{}", host, port);
        return;
    }

    println!("Connected to portal at {}:{}", host, port);
    println!("Queries:  <verb>[,param1,param2,...]   e.g.  get_by_borough,BROOKLYN");
    println!("Commands: :stream <query>   :send <dst> <text>   :quit");

    loop {
        print!("> "); // Prompt symbol
        io::stdout().flush().unwrap(); // Ensure the prompt is displayed immediately

        let mut input = String::new();
        if io::stdin().read_line(&mut input).unwrap_or(0) == 0 {
            break; // EOF
        }

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == ":quit" {
            break;
        }

        if let Some(rest) = trimmed.strip_prefix(":send ") {
            run_send(&client, rest);
        } else if let Some(rest) = trimmed.strip_prefix(":stream ") {
            run_stream(&client, rest);
        } else {
            run_query(&client, trimmed);
        }
    }
}

fn parse_query(line: &str) -> QueryRequest {
    let mut parts = line.split(',').map(|p| p.trim().to_string());
    let verb = parts.next().unwrap_or_default();
    let params: Vec<String> = parts.collect();
    QueryRequest::new(Uuid::new_v4().to_string(), verb, params)
}

fn run_query(client: &OverlayClient, line: &str) {
    match client.query(&parse_query(line)) {
        Ok(response) => print_response(&response),
        Err(e) => eprintln!("RPC failed: {}", e),
    }
}

fn run_stream(client: &OverlayClient, line: &str) {
    let mut chunks = 0usize;
    match client.stream(&parse_query(line), |_| chunks += 1) {
        Ok(response) => {
            println!("({} chunks)", chunks);
            print_response(&response);
        }
        Err(e) => eprintln!("RPC failed: {}", e),
    }
}

fn run_send(client: &OverlayClient, rest: &str) {
    let Some((destination, text)) = rest.split_once(' ') else {
        eprintln!("Usage: :send <dst> <text>");
        return;
    };
    match client.send_bytes("client", destination, text.as_bytes().to_vec()) {
        Ok(()) => println!("sent {} bytes to {}", text.len(), destination),
        Err(e) => eprintln!("RPC failed: {}", e),
    }
}

fn print_response(response: &QueryResponse) {
    let status = if response.success { "ok" } else { "FAILED" };
    println!("[{}] {}", status, response.message);
    for entry in &response.entries {
        println!("  {} = {}", entry.key, render_value(&entry.value));
    }
    if !response.timing_data.is_empty() {
        println!("{}", response.timing_data);
    }
}

fn render_value(value: &DataValue) -> String {
    match value {
        DataValue::Int32(n) => n.to_string(),
        DataValue::Float64(x) => x.to_string(),
        DataValue::Bool(b) => b.to_string(),
        DataValue::Text(s) => s.clone(),
        other => other
            .wire_string()
            .unwrap_or_else(|| format!("{:?}", other)),
    }
}
