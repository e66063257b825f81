// Example: idempotent-region analysis over a scripted firmware trace.
//
// A real host feeds the analyzer from an emulator's instruction and memory
// hooks. This example replays a small hand-written trace instead, so the
// region boundaries are easy to follow by eye:
//
// - `main` reads a sensor value from a global, then overwrites it (a WAR
//   hazard ending the first region),
// - `log_sample` is entered, ending the region in the inter-procedural
//   variants,
// - a checkpointed double-write pattern shows W-R-W protection.
//
// Run with: cargo run --example trace_idempotency -- [output-dir]

use icemu_idempotency::{
    IdempotencyAnalyzer, MemoryEvent, RegisterOracle, Symbol, SymbolKind, SymbolTable,
    ESTACK_SYMBOL,
};

const ESTACK: u64 = 0x2000_8000;
const MAIN: u64 = 0x0800_0100;
const LOG_SAMPLE: u64 = 0x0800_0200;
const SENSOR_VALUE: u64 = 0x2000_0010;

struct Registers {
    sp: u64,
}

impl RegisterOracle for Registers {
    fn sp(&self) -> u64 {
        self.sp
    }
}

/// One replayed instruction: its PC, the SP while it executes, and the
/// memory accesses it performs.
struct TraceStep {
    pc: u64,
    sp: u64,
    accesses: Vec<MemoryEvent>,
}

fn step(pc: u64, sp: u64, accesses: Vec<MemoryEvent>) -> TraceStep {
    TraceStep { pc, sp, accesses }
}

fn scripted_trace() -> Vec<TraceStep> {
    let sp = 0x2000_7f40;
    let frame_sp = 0x2000_7f00;
    vec![
        // main: read the sensor global, then overwrite it -> WAR.
        step(MAIN, sp, vec![]),
        step(MAIN + 4, frame_sp, vec![MemoryEvent::read(MAIN + 4, SENSOR_VALUE, 4)]),
        step(MAIN + 8, frame_sp, vec![MemoryEvent::write(MAIN + 8, SENSOR_VALUE, 4)]),
        // call into log_sample: inter-procedural variants end the region.
        step(LOG_SAMPLE, frame_sp, vec![]),
        step(
            LOG_SAMPLE + 4,
            frame_sp,
            vec![MemoryEvent::write(LOG_SAMPLE + 4, 0x2000_0020, 4)],
        ),
        step(
            LOG_SAMPLE + 8,
            frame_sp,
            vec![MemoryEvent::read(LOG_SAMPLE + 8, 0x2000_0020, 4)],
        ),
        // W-R-W on the same global: protected variants stay quiet, the
        // no-protected variants flag a second boundary here.
        step(
            LOG_SAMPLE + 12,
            frame_sp,
            vec![MemoryEvent::write(LOG_SAMPLE + 12, 0x2000_0020, 4)],
        ),
    ]
}

fn main() {
    env_logger::init();

    let symbols = SymbolTable::from_symbols([
        Symbol::new(ESTACK_SYMBOL, ESTACK, SymbolKind::Object),
        Symbol::new("main", MAIN, SymbolKind::Function),
        Symbol::new("log_sample", LOG_SAMPLE, SymbolKind::Function),
    ]);

    let mut analyzer = match IdempotencyAnalyzer::new(&symbols) {
        Ok(analyzer) => analyzer,
        Err(err) => {
            eprintln!("analyzer construction failed: {err}");
            std::process::exit(1);
        }
    };

    for trace_step in scripted_trace() {
        let regs = Registers { sp: trace_step.sp };
        analyzer.on_instruction(trace_step.pc, &regs);
        for access in &trace_step.accesses {
            analyzer.on_memory(access, &regs);
        }
    }

    println!("=== Region boundaries per detector variant ===\n");
    for sink in analyzer.sinks().collect::<Vec<_>>() {
        let records = analyzer.records_for(sink).unwrap();
        println!("{sink}: {} record(s)", records.len());
        for record in records {
            println!("  {record}");
        }
        println!();
    }

    if let Some(records) = analyzer.records_for("idempotent-sections-intra-procedural.csv") {
        if let Some(first) = records.first() {
            println!("=== First intra-procedural record as JSON ===\n");
            println!("{}\n", serde_json::to_string_pretty(first).unwrap());
        }
    }

    // Mirror the plugin-argument convention of the host CLI.
    let args: Vec<String> = std::env::args()
        .skip(1)
        .map(|dir| format!("idempotent-stats-output-dir={dir}"))
        .collect();
    let written = analyzer.finish(&args);
    for path in written {
        println!("wrote {}", path.display());
    }
}
