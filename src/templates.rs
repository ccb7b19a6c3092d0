//! Report templates shipped with the binary.

use crate::model::Report;
use crate::parser;

/// Shared system description attached to every built-in report.
pub const BUILTIN_CONTEXT: &str = "
SYSTEM SPECIFICATION: RIGOR-HSPA-Secure++
Architecture: Hybrid Semantic Processing Architecture (HSPA) using Semantic Execution Graphs (SEG).
Processor: 128-bit nodes with Bayesian Probabilistic Microcontroller (PMCU) for scheduling.
Genomics: pQC pipeline for SNP ingestion (VCF/CSV), GRCh38 alignment, and Additive Model PRS computation.
Security: Post-Quantum Cryptography (PQC) using Kyber-768 (KEM) and Dilithium-III (DSA).
Legal Mapping: SSA Listings 11.00 (Neurological) and 12.02 (Neurocognitive), ADA Title II, SSR 16-4p.

GPRS CORE EQUATIONS:
1. Floating Weight Vector: ω_i(t) = ∫ [NIH_μ + Arxiv_σ + Scholar_κ] dt
2. HSPA Node Liability: L_node = Σ (ω_i * χ_i) where χ_i ∈ {0, 1, 2} (Allele Count)
3. Adjudication Probability: P(A|G) = sigmoid(L_node * PMCU_prior)
";

pub const BUILTIN_REPORTS: &str = "
--- Report 1 ---
Report 1 — Data Provenance & Genomic Lineage
---
1. Purpose
Document the origins of the genome file prepared for HSPA ingestion.
---
2. Executive summary
• File: [genome file name]
• Genomic reference: GRCh38.fa
• Security: enclave-locked at rest.
---
3. Dataset manifest
• Dataset ID: [dataset id]
• Source: [repository or archive]
--- Report 2 ---
Report 2 — Model Reproducibility & HSPA ISA Validation
---
1. Purpose
Validate SEG execution reproducibility on HSPA-v1.2.
--- Report 3 ---
Report 3 — Performance & Bayesian Calibration Report
--- Report 4 ---
Report 4 — Fairness, Subgroup & Ancestry Bias Audit
--- Report 5 ---
Report 5 — Post-Quantum Security & Privacy Risk Assessment
--- Report 6 ---
Report 6 — Regulatory & Legal Compliance (SSA/ADA)
--- Report 7 ---
Report 7 — Operational Monitoring & Drift Surveillance
--- Report 8 ---
Report 8 — Independent Auditor Final Certification
--- Report 9 ---
Report 9 — Technical Appendix & Deployment Manifest
";

/// Parse the built-in templates. Callers own the result and pass it on;
/// nothing is cached here.
pub fn builtin_reports() -> Vec<Report> {
    parser::parse(BUILTIN_REPORTS, Some(BUILTIN_CONTEXT))
}
