//! Reference data seeded into every database
//!
//! - `STRATEGIES` - the tax-planning strategy library, grouped into 8 phases
//! - `ONBOARDING_TASKS` - the onboarding checklist every client receives
//!
//! Strategy IDs are stable: client assignments and tier bounds refer to them
//! by number. Phase boundaries fall at IDs 6, 13, 23, 30, 38, 49, 59 and 70.

/// One catalog strategy
#[derive(Debug, Clone, Copy)]
pub struct StrategySeed {
    pub id: u32,
    pub name: &'static str,
    pub phase: u32,
    pub irc_citation: &'static str,
    pub description: &'static str,
    pub typical_savings_low: f64,
    pub typical_savings_high: f64,
}

/// One onboarding checklist task
#[derive(Debug, Clone, Copy)]
pub struct OnboardingTaskSeed {
    pub id: u32,
    pub phase: &'static str,
    pub task_name: &'static str,
    pub owner: &'static str,
    pub default_deadline_days: u32,
    pub sort_order: u32,
}

/// Number of workflow phases in the strategy library
pub const PHASE_COUNT: u32 = 8;

const fn s(
    id: u32,
    phase: u32,
    name: &'static str,
    irc_citation: &'static str,
    description: &'static str,
    typical_savings_low: f64,
    typical_savings_high: f64,
) -> StrategySeed {
    StrategySeed {
        id,
        name,
        phase,
        irc_citation,
        description,
        typical_savings_low,
        typical_savings_high,
    }
}

pub static STRATEGIES: &[StrategySeed] = &[
    // Phase 1 - entity and compensation basics
    s(1, 1, "S Corporation Election", "IRC §1362", "Elect S corporation status so distributions avoid self-employment tax.", 5_000.0, 25_000.0),
    s(2, 1, "Reasonable Compensation Study", "IRC §3121", "Document a defensible owner salary to balance payroll tax against audit risk.", 1_000.0, 8_000.0),
    s(3, 1, "Accountable Plan", "IRC §62(c)", "Reimburse owners for business expenses paid personally, deductible to the company and tax-free to the owner.", 1_000.0, 5_000.0),
    s(4, 1, "Home Office Reimbursement", "IRC §280A(c)", "Reimburse the business-use share of home costs through the accountable plan.", 1_000.0, 4_000.0),
    s(5, 1, "Business Vehicle Deduction", "IRC §280F", "Deduct business use of a vehicle by actual expense or standard mileage.", 2_000.0, 10_000.0),
    s(6, 1, "Self-Employed Health Insurance", "IRC §162(l)", "Run owner health premiums through payroll so they are deductible above the line.", 1_500.0, 6_000.0),
    // Phase 2 - family and everyday deductions
    s(7, 2, "Augusta Rule", "IRC §280A(g)", "Rent your home to the business for up to 14 days a year, tax-free to you.", 5_000.0, 15_000.0),
    s(8, 2, "Hiring Family Members", "IRC §3121(b)(3)", "Pay children reasonable wages for real work, shifting income to lower brackets.", 3_000.0, 12_000.0),
    s(9, 2, "Business Meals", "IRC §274(k)", "Capture and substantiate deductible business meals.", 500.0, 3_000.0),
    s(10, 2, "Technology and Cell Phone", "IRC §162", "Deduct business share of phones, internet and equipment.", 300.0, 1_500.0),
    s(11, 2, "Qualified Business Income Deduction", "IRC §199A", "Optimize wages and income to maximize the 20% pass-through deduction.", 2_000.0, 20_000.0),
    s(12, 2, "SEP IRA", "IRC §408(k)", "Employer contributions of up to 25% of compensation.", 3_000.0, 15_000.0),
    s(13, 2, "Health Savings Account", "IRC §223", "Triple tax-advantaged savings paired with a high-deductible health plan.", 1_000.0, 3_000.0),
    // Phase 3 - depreciation, credits and benefits
    s(14, 3, "Solo 401(k)", "IRC §401(k)", "Employee deferral plus employer profit sharing for owner-only businesses.", 5_000.0, 20_000.0),
    s(15, 3, "Cost Segregation Study", "IRC §168", "Reclassify building components into shorter recovery periods.", 10_000.0, 100_000.0),
    s(16, 3, "Bonus Depreciation", "IRC §168(k)", "Expense qualifying property in the year it is placed in service.", 5_000.0, 50_000.0),
    s(17, 3, "Section 179 Expensing", "IRC §179", "Elect to expense equipment and qualifying improvements immediately.", 5_000.0, 40_000.0),
    s(18, 3, "De Minimis Safe Harbor", "Treas. Reg. §1.263(a)-1(f)", "Expense small-dollar asset purchases instead of capitalizing them.", 500.0, 3_000.0),
    s(19, 3, "Research and Development Credit", "IRC §41", "Credit for qualified research expenses, including software development.", 5_000.0, 50_000.0),
    s(20, 3, "Work Opportunity Tax Credit", "IRC §51", "Credit for hiring from targeted groups.", 1_200.0, 9_600.0),
    s(21, 3, "Qualified Small Business Stock", "IRC §1202", "Exclude gain on qualifying C corporation stock held five years.", 10_000.0, 500_000.0),
    s(22, 3, "Qualified Small Employer HRA", "IRC §9831(d)", "Reimburse employee health costs tax-free without a group plan.", 2_000.0, 8_000.0),
    s(23, 3, "Educational Assistance Program", "IRC §127", "Provide up to $5,250 of tax-free education benefits per employee.", 1_000.0, 5_250.0),
    // Phase 4 - advanced retirement and giving
    s(24, 4, "Dependent Care Assistance", "IRC §129", "Exclude up to $5,000 of dependent care benefits.", 1_000.0, 2_500.0),
    s(25, 4, "Defined Benefit Plan", "IRC §412", "Large deductible contributions for high earners nearing retirement.", 20_000.0, 100_000.0),
    s(26, 4, "Cash Balance Plan", "IRC §401(a)", "Hybrid pension allowing contributions well above 401(k) limits.", 15_000.0, 80_000.0),
    s(27, 4, "Group Term Life Insurance", "IRC §79", "Provide up to $50,000 of employer-paid coverage tax-free.", 200.0, 1_000.0),
    s(28, 4, "Donating Appreciated Stock", "IRC §170", "Deduct fair market value and avoid capital gains on gifted securities.", 2_000.0, 20_000.0),
    s(29, 4, "Donor Advised Fund", "IRC §4966", "Bunch several years of giving into one deductible contribution.", 2_000.0, 25_000.0),
    s(30, 4, "Tax-Loss Harvesting", "IRC §1211", "Realize losses to offset gains and up to $3,000 of ordinary income.", 1_000.0, 10_000.0),
    // Phase 5 - real estate and energy
    s(31, 5, "Installment Sale", "IRC §453", "Spread gain recognition over the years payments are received.", 5_000.0, 50_000.0),
    s(32, 5, "Like-Kind Exchange", "IRC §1031", "Defer gain by exchanging into replacement real property.", 10_000.0, 200_000.0),
    s(33, 5, "Opportunity Zone Investment", "IRC §1400Z-2", "Defer and reduce gains reinvested in a qualified opportunity fund.", 10_000.0, 150_000.0),
    s(34, 5, "Real Estate Professional Status", "IRC §469(c)(7)", "Treat rental losses as non-passive against ordinary income.", 10_000.0, 75_000.0),
    s(35, 5, "Short-Term Rental Strategy", "Treas. Reg. §1.469-1T(e)(3)", "Materially participate in short-term rentals to unlock depreciation losses.", 10_000.0, 60_000.0),
    s(36, 5, "Energy Efficient Commercial Buildings", "IRC §179D", "Deduction for energy-efficient commercial building property.", 5_000.0, 50_000.0),
    s(37, 5, "Residential Clean Energy Credit", "IRC §25D", "30% credit for solar, geothermal and battery storage.", 3_000.0, 15_000.0),
    s(38, 5, "Clean Vehicle Credit", "IRC §45W", "Credit for qualified commercial clean vehicles.", 3_750.0, 7_500.0),
    // Phase 6 - structure and risk management
    s(39, 6, "Management Company Structure", "IRC §482", "Centralize services in a management entity with arm's-length fees.", 5_000.0, 30_000.0),
    s(40, 6, "Family Limited Partnership", "IRC §2704", "Transfer discounted interests in family assets to the next generation.", 10_000.0, 100_000.0),
    s(41, 6, "Intentionally Defective Grantor Trust", "IRC §671", "Freeze estate value while the grantor pays the trust's income tax.", 20_000.0, 250_000.0),
    s(42, 6, "Charitable Remainder Trust", "IRC §664", "Convert appreciated assets into an income stream with an upfront deduction.", 15_000.0, 150_000.0),
    s(43, 6, "Charitable Lead Trust", "IRC §170(f)(2)(B)", "Pay charity first, pass the remainder to heirs at reduced transfer tax.", 15_000.0, 150_000.0),
    s(44, 6, "Pass-Through Entity Tax Election", "IRC §164(b)(6)", "Pay state tax at the entity level to work around the SALT cap.", 2_000.0, 30_000.0),
    s(45, 6, "Captive Insurance Company", "IRC §831(b)", "Insure genuine business risks through an owner-controlled insurer.", 20_000.0, 200_000.0),
    s(46, 6, "Employee Stock Ownership Plan", "IRC §1042", "Defer gain on a sale of shares to an ESOP.", 50_000.0, 500_000.0),
    s(47, 6, "Qualified Conservation Easement", "IRC §170(h)", "Deduct the value of a perpetual conservation restriction.", 20_000.0, 200_000.0),
    s(48, 6, "Intangible Drilling Costs", "IRC §263(c)", "Deduct most of an oil and gas working interest in year one.", 20_000.0, 150_000.0),
    s(49, 6, "Net Operating Loss Planning", "IRC §172", "Time income and deductions to use loss carryforwards efficiently.", 5_000.0, 50_000.0),
    // Phase 7 - estate and wealth transfer
    s(50, 7, "Private Foundation", "IRC §501(c)(3)", "Family-controlled charity with an immediate deduction.", 20_000.0, 300_000.0),
    s(51, 7, "Grantor Retained Annuity Trust", "IRC §2702", "Pass appreciation above the hurdle rate to heirs gift-tax free.", 25_000.0, 400_000.0),
    s(52, 7, "Qualified Personal Residence Trust", "IRC §2702(a)(3)", "Transfer a residence at a discounted gift value.", 20_000.0, 200_000.0),
    s(53, 7, "Spousal Lifetime Access Trust", "IRC §2523", "Use exemption now while a spouse keeps indirect access.", 50_000.0, 500_000.0),
    s(54, 7, "Dynasty Trust", "IRC §2631", "Shelter assets from transfer tax across generations.", 50_000.0, 1_000_000.0),
    s(55, 7, "Irrevocable Life Insurance Trust", "IRC §2042", "Keep life insurance proceeds out of the taxable estate.", 25_000.0, 500_000.0),
    s(56, 7, "Annual Gift Exclusion Program", "IRC §2503(b)", "Systematically use annual exclusion gifts.", 5_000.0, 50_000.0),
    s(57, 7, "529 Plan Superfunding", "IRC §529(c)(2)(B)", "Front-load five years of annual exclusion gifts into education accounts.", 5_000.0, 40_000.0),
    s(58, 7, "Installment Sale to Grantor Trust", "Rev. Rul. 85-13", "Sell appreciating assets to a grantor trust for a note.", 25_000.0, 500_000.0),
    s(59, 7, "Deferred Sales Trust", "IRC §453", "Defer gain on a business or property sale through a third-party trust.", 25_000.0, 300_000.0),
    // Phase 8 - specialized planning
    s(60, 8, "Non-Grantor Trust for State Tax", "IRC §641", "Move income-producing assets to a trust taxed in a no-tax state.", 5_000.0, 75_000.0),
    s(61, 8, "Incomplete Gift Non-Grantor Trust", "IRC §2511", "Avoid state income tax without using gift exemption.", 10_000.0, 150_000.0),
    s(62, 8, "Puerto Rico Relocation", "IRC §933", "Exclude Puerto Rico source income for bona fide residents.", 50_000.0, 1_000_000.0),
    s(63, 8, "Section 1244 Stock Loss", "IRC §1244", "Treat losses on small business stock as ordinary.", 5_000.0, 40_000.0),
    s(64, 8, "Entity Conversion Planning", "IRC §1374", "Plan around built-in gains when converting entity type.", 10_000.0, 100_000.0),
    s(65, 8, "Accumulated Earnings Planning", "IRC §531", "Document business needs for retained C corporation earnings.", 5_000.0, 50_000.0),
    s(66, 8, "C Corporation Rate Planning", "IRC §11", "Retain earnings at the flat 21% corporate rate.", 10_000.0, 100_000.0),
    s(67, 8, "Nonqualified Deferred Compensation", "IRC §409A", "Defer compensation to lower-bracket years.", 10_000.0, 100_000.0),
    s(68, 8, "Split-Dollar Life Insurance", "Treas. Reg. §1.61-22", "Share premium cost and benefits between employer and executive.", 10_000.0, 100_000.0),
    s(69, 8, "Charitable Gift Annuity", "IRC §514(c)(5)", "Exchange a gift for lifetime payments and a partial deduction.", 5_000.0, 50_000.0),
    s(70, 8, "Business Succession Planning", "IRC §2032A", "Structure an exit that minimizes income and estate tax.", 50_000.0, 1_000_000.0),
];

pub static ONBOARDING_TASKS: &[OnboardingTaskSeed] = &[
    OnboardingTaskSeed { id: 1, phase: "Setup", task_name: "Sign engagement letter", owner: "Client", default_deadline_days: 3, sort_order: 1 },
    OnboardingTaskSeed { id: 2, phase: "Setup", task_name: "Complete intake questionnaire", owner: "Client", default_deadline_days: 7, sort_order: 2 },
    OnboardingTaskSeed { id: 3, phase: "Setup", task_name: "Upload prior three years of tax returns", owner: "Client", default_deadline_days: 7, sort_order: 3 },
    OnboardingTaskSeed { id: 4, phase: "Setup", task_name: "Schedule kickoff meeting", owner: "Advisor", default_deadline_days: 5, sort_order: 4 },
    OnboardingTaskSeed { id: 5, phase: "Setup", task_name: "Grant bookkeeping software access", owner: "Client", default_deadline_days: 10, sort_order: 5 },
    OnboardingTaskSeed { id: 6, phase: "Foundation", task_name: "Review entity structure", owner: "Advisor", default_deadline_days: 14, sort_order: 6 },
    OnboardingTaskSeed { id: 7, phase: "Foundation", task_name: "Reasonable compensation analysis", owner: "Advisor", default_deadline_days: 21, sort_order: 7 },
    OnboardingTaskSeed { id: 8, phase: "Foundation", task_name: "Adopt accountable plan", owner: "Both", default_deadline_days: 21, sort_order: 8 },
    OnboardingTaskSeed { id: 9, phase: "Foundation", task_name: "Set up owner payroll", owner: "Both", default_deadline_days: 30, sort_order: 9 },
    OnboardingTaskSeed { id: 10, phase: "Accounting", task_name: "Open Profit First bank accounts", owner: "Client", default_deadline_days: 30, sort_order: 10 },
    OnboardingTaskSeed { id: 11, phase: "Accounting", task_name: "Clean up chart of accounts", owner: "Advisor", default_deadline_days: 30, sort_order: 11 },
    OnboardingTaskSeed { id: 12, phase: "Accounting", task_name: "Reconcile year-to-date books", owner: "Advisor", default_deadline_days: 45, sort_order: 12 },
    OnboardingTaskSeed { id: 13, phase: "Accounting", task_name: "Set quarterly estimated payments", owner: "Advisor", default_deadline_days: 45, sort_order: 13 },
    OnboardingTaskSeed { id: 14, phase: "Retirement", task_name: "Review existing retirement accounts", owner: "Both", default_deadline_days: 60, sort_order: 14 },
    OnboardingTaskSeed { id: 15, phase: "Retirement", task_name: "Select retirement plan design", owner: "Advisor", default_deadline_days: 75, sort_order: 15 },
    OnboardingTaskSeed { id: 16, phase: "Retirement", task_name: "Open retirement plan accounts", owner: "Client", default_deadline_days: 90, sort_order: 16 },
];

/// Last strategy ID in each phase, indexed by phase - 1
pub const PHASE_END_IDS: [u32; PHASE_COUNT as usize] = [6, 13, 23, 30, 38, 49, 59, 70];

/// Phase a strategy ID belongs to, or None if out of range
pub fn phase_for_strategy(id: u32) -> Option<u32> {
    if id == 0 {
        return None;
    }
    PHASE_END_IDS
        .iter()
        .position(|&end| id <= end)
        .map(|idx| idx as u32 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::PackageTier;

    #[test]
    fn test_ids_are_contiguous() {
        for (idx, strategy) in STRATEGIES.iter().enumerate() {
            assert_eq!(strategy.id, idx as u32 + 1);
        }
        assert_eq!(STRATEGIES.len(), 70);
    }

    #[test]
    fn test_phase_matches_boundaries() {
        for strategy in STRATEGIES {
            assert_eq!(phase_for_strategy(strategy.id), Some(strategy.phase), "strategy {}", strategy.id);
            assert!(strategy.typical_savings_low <= strategy.typical_savings_high);
        }
        assert_eq!(phase_for_strategy(71), None);
    }

    #[test]
    fn test_tier_bounds_end_on_phase_boundaries() {
        for tier in PackageTier::ALL {
            let max_id = tier.max_strategy_id();
            if max_id == 0 {
                continue;
            }
            assert_eq!(phase_for_strategy(max_id), Some(tier.max_phase()));
            assert_ne!(phase_for_strategy(max_id + 1), Some(tier.max_phase()));
        }
    }

    #[test]
    fn test_onboarding_phases_and_owners() {
        for task in ONBOARDING_TASKS {
            assert!(["Setup", "Foundation", "Accounting", "Retirement"].contains(&task.phase));
            assert!(["Client", "Advisor", "Both"].contains(&task.owner));
        }
    }
}
