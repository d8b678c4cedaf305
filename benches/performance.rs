use mathdown_tui::{
    CancelToken, MappingStrategy, RenderMode, RenderPipeline,
    markup::{CmarkConverter, MarkupConverter},
    math::MathRasterizer,
    render::render_preview,
    segment::segment,
    styles::{map_styles, plain_text, project},
    theme::Theme,
};
use std::time::{Duration, Instant};

/// Performance benchmark suite for the preview pipeline
///
/// Run with: cargo test --release --bench performance -- --nocapture
///
/// This measures:
/// - Segmentation
/// - Style mapping, structured and positional
/// - Full render passes with a warm math cache
/// - Terminal layout of a render list
const SMALL_DOC_BLOCKS: usize = 10;
const MEDIUM_DOC_BLOCKS: usize = 100;
const LARGE_DOC_BLOCKS: usize = 1000;

const ITERATIONS: usize = 100;

/// Create a Markdown document that cycles through every block kind and
/// delimiter family
fn create_test_document(num_blocks: usize) -> String {
    let mut doc = String::new();
    for i in 0..num_blocks {
        let block = match i % 6 {
            0 => format!("# Section {i}\n\n"),
            1 => format!(
                "Paragraph {i} has **bold**, *italic*, `code` and $x_{{{i}}}^2$ inline.\n\n"
            ),
            2 => format!("$$\\sum_{{k=0}}^{{{i}}} k = \\frac{{{i}({i}+1)}}{{2}}$$\n\n"),
            3 => format!("- item \\(a_{i}\\)\n- another item\n\n"),
            4 => format!("> quoted text with \\[\\int_0^{i} t\\,dt\\]\n\n"),
            _ => format!("1. first\n2. second {i}\n\n```\ncode {i}\n```\n\n"),
        };
        doc.push_str(&block);
    }
    doc
}

struct BenchmarkResult {
    name: String,
    iterations: usize,
    total_duration: Duration,
    avg_duration: Duration,
    min_duration: Duration,
    max_duration: Duration,
}

impl BenchmarkResult {
    fn print(&self) {
        println!("\n{}", "=".repeat(70));
        println!("Benchmark: {}", self.name);
        println!("{}", "=".repeat(70));
        println!("Iterations:     {}", self.iterations);
        println!("Total time:     {:?}", self.total_duration);
        println!("Average:        {:?}", self.avg_duration);
        println!("Min:            {:?}", self.min_duration);
        println!("Max:            {:?}", self.max_duration);
        println!(
            "Ops/sec:        {:.2}",
            1_000_000.0 / self.avg_duration.as_micros().max(1) as f64
        );

        // Highlight if performance is concerning
        if self.avg_duration.as_millis() > 100 {
            println!("\n⚠️  WARNING: Average duration > 100ms (user-perceptible lag)");
        } else if self.avg_duration.as_millis() > 16 {
            println!("\n⚠️  WARNING: Average duration > 16ms (may drop frames)");
        }
    }
}

fn benchmark<F>(name: &str, iterations: usize, mut f: F) -> BenchmarkResult
where
    F: FnMut(),
{
    let mut durations = Vec::with_capacity(iterations);

    // Warmup
    for _ in 0..10 {
        f();
    }

    for _ in 0..iterations {
        let start = Instant::now();
        f();
        durations.push(start.elapsed());
    }

    let total_duration: Duration = durations.iter().sum();
    let avg_duration = total_duration / iterations as u32;
    let min_duration = *durations.iter().min().unwrap();
    let max_duration = *durations.iter().max().unwrap();

    BenchmarkResult {
        name: name.to_string(),
        iterations,
        total_duration,
        avg_duration,
        min_duration,
        max_duration,
    }
}

fn documents() -> Vec<(&'static str, String)> {
    vec![
        ("Small (10 blocks)", create_test_document(SMALL_DOC_BLOCKS)),
        ("Medium (100 blocks)", create_test_document(MEDIUM_DOC_BLOCKS)),
        ("Large (1000 blocks)", create_test_document(LARGE_DOC_BLOCKS)),
    ]
}

fn iterations_for(name: &str) -> usize {
    if name.contains("Large") { 10 } else { ITERATIONS }
}

#[test]
fn bench_segmentation() {
    println!("\n\n╔════════════════════════════════════════════════════════════════╗");
    println!("║                 SEGMENTATION BENCHMARKS                        ║");
    println!("╚════════════════════════════════════════════════════════════════╝");

    for (name, doc) in documents() {
        let result = benchmark(&format!("segment - {}", name), iterations_for(name), || {
            let _ = segment(&doc);
        });
        result.print();
    }
}

#[test]
fn bench_style_mapping() {
    println!("\n\n╔════════════════════════════════════════════════════════════════╗");
    println!("║                 STYLE MAPPING BENCHMARKS                       ║");
    println!("╚════════════════════════════════════════════════════════════════╝");

    for (name, doc) in documents() {
        let markup = CmarkConverter.convert(&doc);
        let tree = CmarkConverter.convert_tree(&doc);
        let text = plain_text(&tree);

        let result = benchmark(
            &format!("structured - {}", name),
            iterations_for(name),
            || {
                let _ = project(&tree);
            },
        );
        result.print();

        let result = benchmark(
            &format!("positional - {}", name),
            iterations_for(name),
            || {
                let _ = map_styles(&text, &markup);
            },
        );
        result.print();
    }
}

#[test]
fn bench_full_pass_warm_cache() {
    println!("\n\n╔════════════════════════════════════════════════════════════════╗");
    println!("║              FULL RENDER PASS BENCHMARKS                       ║");
    println!("╚════════════════════════════════════════════════════════════════╝");

    for strategy in [MappingStrategy::Structured, MappingStrategy::Positional] {
        let pipeline = RenderPipeline::new(CmarkConverter, strategy, MathRasterizer::default());
        for (name, doc) in documents() {
            let result = benchmark(
                &format!("{:?} pass - {}", strategy, name),
                iterations_for(name),
                || {
                    let _ = pipeline.run(&doc, RenderMode::Preview, &CancelToken::never());
                },
            );
            result.print();
        }
        let stats = pipeline.rasterizer().stats();
        println!(
            "\nMath cache: {} entries, {} hits, {} engine calls",
            stats.entries, stats.hits, stats.engine_calls
        );
    }
}

#[test]
fn bench_preview_layout() {
    println!("\n\n╔════════════════════════════════════════════════════════════════╗");
    println!("║                 PREVIEW LAYOUT BENCHMARKS                      ║");
    println!("╚════════════════════════════════════════════════════════════════╝");

    let pipeline = RenderPipeline::default();
    let theme = Theme::default();
    for (name, doc) in documents() {
        let Ok(output) = pipeline.run(&doc, RenderMode::Preview, &CancelToken::never()) else {
            continue;
        };
        let result = benchmark(
            &format!("render_preview - {}", name),
            iterations_for(name),
            || {
                let _ = render_preview(&output.items, 80, &theme);
            },
        );
        result.print();
    }
}

#[test]
fn benchmark_keystroke_cycle() {
    println!("\n=== Keystroke Performance ===\n");

    let mut doc = create_test_document(584);
    let pipeline = RenderPipeline::default();
    let theme = Theme::default();
    let _ = pipeline.run(&doc, RenderMode::Preview, &CancelToken::never());

    let iterations = 100;
    let start = Instant::now();
    for _ in 0..iterations {
        doc.push('x');
        if let Ok(output) = pipeline.run(&doc, RenderMode::Preview, &CancelToken::never()) {
            let _ = render_preview(&output.items, 80, &theme);
        }
    }
    let total = start.elapsed();
    let avg = total / iterations as u32;

    println!("Document: 584 blocks");
    println!("Iterations: {}", iterations);
    println!("Total time: {:?}", total);
    println!("Average per keypress: {:.2}ms", avg.as_secs_f64() * 1000.0);

    if avg.as_millis() > 16 {
        println!("  ❌ WARNING: Full pass slower than one 60Hz frame");
    } else {
        println!("  ✅ PASSED: Full pass < 16ms - should feel responsive");
    }
}
