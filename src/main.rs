use popflow::te::{
    mocks, solve_dual, solve_path_formulation, solve_pop, DualConfig, Objective, PathFormConfig,
    PopConfig, SplitMethod,
};

fn main() -> popflow::te::Result<()> {
    env_logger::init();
    let problem = mocks::mock_ring_problem(8, 2.0);
    log::info!(
        "{}: {} nodes, {} commodities, total demand {}",
        problem.name,
        problem.graph.node_count(),
        problem.commodity_list.len(),
        problem.total_demand()
    );
    popflow::te::utils::draw(&problem.graph);

    for objective in [
        Objective::TotalFlow,
        Objective::MaxConcurrentFlow,
        Objective::MinMaxLinkUtil,
        Objective::ComputeDemandScaleFactor,
    ] {
        let config = PathFormConfig {
            objective,
            ..PathFormConfig::default()
        };
        match solve_path_formulation(&problem, config) {
            Ok(sol) => println!("{}\t{}\t{:?}", objective, sol.obj_val, sol.runtime),
            Err(e) => println!("{}\tfailed: {}", objective, e),
        }
    }

    let pop = solve_pop(
        &problem,
        PopConfig {
            num_subproblems: 4,
            split_method: SplitMethod::Means,
            split_fraction: 0.5,
            parallel: true,
            ..PopConfig::default()
        },
    )?;
    println!(
        "pop\t{}\t{:?}",
        pop.obj_val,
        pop.runtime_est(popflow::te::solver::num_cores())
    );

    let dual = solve_dual(&problem, DualConfig::default(), None)?;
    println!("dual\t{}\t{:?}", dual.total_avg_flow(), dual.runtime);
    Ok(())
}
