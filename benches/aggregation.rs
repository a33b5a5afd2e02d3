use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use lesson_refinery::domain::models::config::{AggregationConfig, FixConfig, ThresholdsConfig};
use lesson_refinery::domain::models::refinement::{
    Confidence, Criterion as RubricCriterion, Issue, IterationLog, JudgeRole, JudgeVerdict,
    LessonContent, PanelEvaluation, Rubric, Section, Severity, TaggedVerdict,
};
use lesson_refinery::services::{EvaluatorAggregator, RefinementRouter, RoutingContext};

const ROLES: [JudgeRole; 3] = [JudgeRole::Cheap, JudgeRole::Primary, JudgeRole::Tiebreaker];

fn panel(judges: usize, issues_per_judge: usize) -> PanelEvaluation {
    let verdicts = (0..judges)
        .map(|j| {
            let issues = (0..issues_per_judge)
                .map(|i| {
                    let criterion = RubricCriterion::ALL[i % RubricCriterion::ALL.len()];
                    Issue::new(
                        criterion,
                        if i % 4 == 0 { Severity::Major } else { Severity::Minor },
                        format!("s{}#p{}", i % 8 + 1, j),
                        format!("Paragraph {i} leaves the {criterion} goal unmet for judge {j}"),
                        "Add a short worked example",
                    )
                })
                .collect();
            TaggedVerdict {
                judge_id: format!("judge-{j}"),
                role: ROLES[j % ROLES.len()],
                weight: 1.0,
                verdict: JudgeVerdict::uniform(0.6 + 0.1 * j as f64, Confidence::High)
                    .with_issues(issues),
            }
        })
        .collect();

    PanelEvaluation {
        verdicts,
        tiebreak_invoked: judges == 3,
        model_calls: judges as u32,
        ..PanelEvaluation::default()
    }
}

fn lesson(sections: usize) -> LessonContent {
    LessonContent::new(
        "Benchmark lesson",
        (1..=sections)
            .map(|i| {
                Section::new(
                    format!("s{i}"),
                    format!("Section {i}"),
                    format!("Body of section {i} with a **term{i}** and `code{i}`."),
                )
            })
            .collect(),
    )
}

fn aggregation(c: &mut Criterion) {
    let aggregator = EvaluatorAggregator::new(Rubric::default(), AggregationConfig::default());
    let mut group = c.benchmark_group("aggregate");

    for issues in [0, 10, 50] {
        let input = panel(3, issues);
        group.throughput(Throughput::Elements((issues * 3) as u64));
        group.bench_with_input(BenchmarkId::new("three_judges", issues), &input, |b, input| {
            b.iter(|| aggregator.aggregate(black_box(input)));
        });
    }

    group.finish();
}

fn routing(c: &mut Criterion) {
    let aggregator = EvaluatorAggregator::new(Rubric::default(), AggregationConfig::default());
    let router = RefinementRouter::new(ThresholdsConfig::default(), &FixConfig::default(), false);
    let history = IterationLog::new();
    let mut group = c.benchmark_group("route");

    for sections in [8, 64] {
        let content = lesson(sections);
        let Ok(verdict) = aggregator.aggregate(&panel(2, 20)) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("sections", sections), &content, |b, content| {
            b.iter(|| {
                router.route(black_box(&RoutingContext {
                    verdict: &verdict,
                    history: &history,
                    content,
                    regressions: &[],
                }))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, aggregation, routing);
criterion_main!(benches);
