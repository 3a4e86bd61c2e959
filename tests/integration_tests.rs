use chrono::{NaiveDate, TimeZone, Utc};
use construction_rollup::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn site(id: &str, name: &str) -> SiteSnapshot {
    let mut snapshot = SiteSnapshot::new(Site {
        id: id.to_string(),
        name: name.to_string(),
    });
    snapshot.boq.packages.push(Package {
        id: format!("{}-civil", id),
        site_id: id.to_string(),
        name: "Civil".to_string(),
    });
    snapshot
}

fn add_headline(snapshot: &mut SiteSnapshot, id: &str, serial: u32, name: &str) {
    let package_id = snapshot.boq.packages[0].id.clone();
    snapshot.boq.headlines.push(BoqHeadline {
        id: id.to_string(),
        package_id,
        serial_number: serial,
        name: name.to_string(),
        status: WorkStatus::InProgress,
    });
}

fn add_line_item(snapshot: &mut SiteSnapshot, headline_id: &str, id: &str, number: &str) {
    snapshot.boq.line_items.push(BoqLineItem {
        id: id.to_string(),
        headline_id: headline_id.to_string(),
        item_number: number.to_string(),
        description: format!("Work item {}", number),
        location: None,
        unit: "sqm".to_string(),
        quantity: 100.0,
        status: WorkStatus::InProgress,
    });
}

fn add_material(snapshot: &mut SiteSnapshot, line_item_id: &str, id: &str) {
    snapshot.boq.materials.push(Material {
        id: id.to_string(),
        line_item_id: line_item_id.to_string(),
        name: format!("Material {}", id),
        material_type: MaterialKind::Direct,
        unit: "bags".to_string(),
        required_quantity: Some(50.0),
    });
}

fn document(owner_id: &str, document_type: DocumentType, file: Option<&str>) -> ComplianceDocument {
    let mut doc = ComplianceDocument::placeholder(owner_id, document_type);
    if let Some(name) = file {
        doc.is_uploaded = true;
        doc.file_path = Some(format!("site/material/{}/{}/{}", owner_id, document_type.as_str(), name));
        doc.file_name = Some(name.to_string());
        doc.uploaded_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
    }
    doc
}

fn sign_checklist(snapshot: &mut SiteSnapshot, line_item_id: &str) {
    snapshot.boq.line_item_checklists.push(LineItemChecklist {
        id: format!("{}-qc", line_item_id),
        line_item_id: line_item_id.to_string(),
        template_id: None,
        signed_copy_path: Some(format!("checklists/{}.pdf", line_item_id)),
        signed_copy_name: Some("signed.pdf".to_string()),
        items: vec![],
    });
}

fn approve_jmr(snapshot: &mut SiteSnapshot, line_item_id: &str) {
    snapshot.boq.jmrs.push(Jmr {
        id: format!("{}-jmr", line_item_id),
        line_item_id: line_item_id.to_string(),
        jmr_number: "JMR-1".to_string(),
        measurement_date: date(2024, 5, 2),
        submitted_date: Some(date(2024, 5, 3)),
        approved_date: Some(date(2024, 5, 4)),
        boq_quantity: 100.0,
        executed_quantity: 98.0,
        approved_quantity: Some(98.0),
        contractor_representative: None,
        client_representative: None,
        status: JmrStatus::Approved,
        file_path: Some(format!("jmr/{}.pdf", line_item_id)),
        file_name: Some("jmr.pdf".to_string()),
    });
}

fn grn(id: &str, site_id: &str, supplier: &str, invoice: &str, day: u32, amount: f64) -> GrnInvoice {
    GrnInvoice {
        id: id.to_string(),
        site_id: site_id.to_string(),
        supplier_id: supplier.to_string(),
        invoice_number: invoice.to_string(),
        grn_date: date(2024, 6, day),
        notes: None,
        dc_document: None,
        line_items: vec![GrnLineItem {
            id: format!("{}-l1", id),
            grn_invoice_id: id.to_string(),
            material_id: None,
            material_name: "Cement".to_string(),
            quantity: 1.0,
            unit: "lot".to_string(),
            rate: amount,
            gst_rate: 0,
            documents: vec![],
        }],
    }
}

fn payment_entry(amount: f64, day: u32) -> PaymentEntry {
    PaymentEntry {
        amount,
        reference: Some(format!("UTR-{}", day)),
        paid_at: Utc.with_ymd_and_hms(2024, 7, day, 12, 0, 0).unwrap(),
        notes: None,
    }
}

fn expense(id: &str, site_id: &str, day: NaiveDate, amount: f64) -> ExpenseEntry {
    ExpenseEntry {
        id: id.to_string(),
        site_id: site_id.to_string(),
        expense_date: day,
        amount,
        description: None,
    }
}

#[test]
fn test_dc_facet_follows_uploaded_files() {
    let mut snapshot = site("s1", "Riverside Towers");
    add_headline(&mut snapshot, "h1", 1, "Plastering");
    add_line_item(&mut snapshot, "h1", "li-uploaded", "1.1");
    add_line_item(&mut snapshot, "h1", "li-missing", "1.2");
    add_material(&mut snapshot, "li-uploaded", "m1");
    add_material(&mut snapshot, "li-missing", "m2");
    snapshot
        .boq
        .material_documents
        .push(document("m1", DocumentType::Dc, Some("dc-0412.pdf")));
    snapshot
        .boq
        .material_documents
        .push(document("m2", DocumentType::Dc, None));

    let report = process_site(&snapshot, &RollupConfig::default()).unwrap();
    let items = &report.rollup.headlines[0].line_items;

    let uploaded = items.iter().find(|i| i.line_item_id == "li-uploaded").unwrap();
    assert_eq!(uploaded.readiness.dc.status, FacetStatus::Y);
    assert_eq!(uploaded.readiness.dc.files.len(), 1);
    assert_eq!(uploaded.readiness.dc.files[0].name, "dc-0412.pdf");

    let missing = items.iter().find(|i| i.line_item_id == "li-missing").unwrap();
    assert_eq!(missing.readiness.dc.status, FacetStatus::N);
    assert!(missing.readiness.dc.files.is_empty());
}

#[test]
fn test_dc_pools_every_material_on_the_line_item() {
    let mut snapshot = site("s1", "Riverside Towers");
    add_headline(&mut snapshot, "h1", 1, "Masonry");
    add_line_item(&mut snapshot, "h1", "li1", "1.1");
    add_material(&mut snapshot, "li1", "brick");
    add_material(&mut snapshot, "li1", "mortar");
    snapshot
        .boq
        .material_documents
        .push(document("brick", DocumentType::Dc, Some("brick-dc.pdf")));
    let mut not_applicable = ComplianceDocument::placeholder("mortar", DocumentType::Dc);
    not_applicable.is_applicable = false;
    snapshot.boq.material_documents.push(not_applicable);

    let config = RollupConfig::default();
    let report = process_site(&snapshot, &config).unwrap();
    let dc = &report.rollup.headlines[0].line_items[0].readiness.dc;
    assert_eq!(dc.status, FacetStatus::Y);
    assert_eq!(dc.files.len(), 1);

    // mortar's DC becomes applicable but nothing is uploaded yet
    let outcome = MutationBatch::new(vec![SiteMutation::SetDocumentApplicability {
        owner: DocumentOwner::Material {
            material_id: "mortar".to_string(),
        },
        document_type: DocumentType::Dc,
        is_applicable: true,
    }])
    .apply(&snapshot, &config)
    .unwrap();

    let report = process_site(&outcome.snapshot, &config).unwrap();
    let item = &report.rollup.headlines[0].line_items[0];
    assert_eq!(item.readiness.dc.status, FacetStatus::N);
    assert_eq!(item.readiness.dc.files.len(), 1);
    assert_eq!(item.readiness.dc.files[0].name, "brick-dc.pdf");
    assert!(!item.ready_for_billing);
}

#[test]
fn test_na_documents_never_block_billing() {
    let mut snapshot = site("s1", "Riverside Towers");
    add_headline(&mut snapshot, "h1", 1, "Flooring");
    add_line_item(&mut snapshot, "h1", "li1", "2.1");
    add_material(&mut snapshot, "li1", "m1");
    for document_type in DocumentType::MATERIAL {
        let mut doc = document("m1", document_type, Some("cert.pdf"));
        if document_type == DocumentType::Tds {
            doc = ComplianceDocument::placeholder("m1", document_type);
            doc.is_applicable = false;
        }
        snapshot.boq.material_documents.push(doc);
    }
    sign_checklist(&mut snapshot, "li1");
    approve_jmr(&mut snapshot, "li1");

    let report = process_site(&snapshot, &RollupConfig::default()).unwrap();
    let item = &report.rollup.headlines[0].line_items[0];
    assert_eq!(item.readiness.tds.status, FacetStatus::NA);
    assert_eq!(item.progress, 100);
    assert!(item.ready_for_billing);
    assert_eq!(report.rollup.badge, ReadinessBadge::Ready);
    assert_eq!(report.rollup.ready_for_billing, 1);
}

#[test]
fn test_headline_averages_line_item_progress() {
    let mut snapshot = site("s1", "Riverside Towers");
    add_headline(&mut snapshot, "h1", 1, "Waterproofing");
    for (id, number) in [("full", "3.1"), ("half", "3.2"), ("none", "3.3")] {
        add_line_item(&mut snapshot, "h1", id, number);
        add_material(&mut snapshot, id, &format!("{}-m", id));
    }

    for document_type in DocumentType::MATERIAL {
        snapshot
            .boq
            .material_documents
            .push(document("full-m", document_type, Some("doc.pdf")));
    }
    sign_checklist(&mut snapshot, "full");
    approve_jmr(&mut snapshot, "full");

    for document_type in [DocumentType::Dc, DocumentType::Mir, DocumentType::TestCertificate] {
        snapshot
            .boq
            .material_documents
            .push(document("half-m", document_type, Some("doc.pdf")));
    }

    let report = process_site(&snapshot, &RollupConfig::default()).unwrap();
    let headline = &report.rollup.headlines[0];

    let progress: Vec<u8> = headline.line_items.iter().map(|i| i.progress).collect();
    assert_eq!(progress, vec![100, 50, 0]);
    assert_eq!(headline.progress, 50);
    assert_eq!(headline.badge, ReadinessBadge::InProgress);
    assert_eq!(headline.badge.label(), "In Progress");
    assert_eq!(report.rollup.overall_progress, 50);
}

#[test]
fn test_grouped_invoice_moves_from_partial_to_paid() {
    let mut snapshot = site("s1", "Riverside Towers");
    snapshot.grn.suppliers.push(Supplier {
        id: "sup-1".to_string(),
        name: "Shree Cements".to_string(),
    });
    snapshot.grn.invoices.push(grn("g1", "s1", "sup-1", "INV-77", 3, 10_000.0));
    snapshot.grn.invoices.push(grn("g2", "s1", "sup-1", "INV-77", 9, 5_000.0));

    let config = RollupConfig::default();
    let report = process_site(&snapshot, &config).unwrap();
    assert_eq!(report.invoice_groups.len(), 1);
    let group = &report.invoice_groups[0];
    assert_eq!(group.entries.len(), 2);
    assert!((group.total_with_gst - 15_000.0).abs() < 1e-9);
    assert_eq!(group.latest_grn_date, date(2024, 6, 9));

    let first = MutationBatch::new(vec![SiteMutation::RecordPayment {
        supplier_id: "sup-1".to_string(),
        invoice_number: "INV-77".to_string(),
        entry: payment_entry(12_000.0, 1),
    }])
    .apply(&snapshot, &config)
    .unwrap();

    let report = process_with_verification(&first.snapshot, &config, 0.01).unwrap();
    let view = &report.supplier_payments[0].invoices[0];
    assert_eq!(view.status, PaymentStatus::Partial);
    assert!((view.paid_amount - 12_000.0).abs() < 1e-9);
    assert!((view.pending_amount - 3_000.0).abs() < 1e-9);
    assert_eq!(report.supplier_payments[0].partial_count, 1);

    let second = MutationBatch::new(vec![SiteMutation::RecordPayment {
        supplier_id: "sup-1".to_string(),
        invoice_number: "INV-77".to_string(),
        entry: payment_entry(3_000.0, 8),
    }])
    .apply(&first.snapshot, &config)
    .unwrap();

    assert_eq!(second.snapshot.payments.len(), 1);
    let report = process_site(&second.snapshot, &config).unwrap();
    let view = &report.supplier_payments[0].invoices[0];
    assert_eq!(view.status, PaymentStatus::Paid);
    assert!((view.paid_amount - 15_000.0).abs() < 1e-9);
    assert_eq!(view.pending_amount, 0.0);
    assert_eq!(view.payment_reference.as_deref(), Some("UTR-8"));
}

#[test]
fn test_payment_for_unknown_invoice_rejects_batch() {
    let mut snapshot = site("s1", "Riverside Towers");
    snapshot.grn.invoices.push(grn("g1", "s1", "sup-1", "INV-1", 1, 1_000.0));

    let result = MutationBatch::new(vec![
        SiteMutation::RecordPayment {
            supplier_id: "sup-1".to_string(),
            invoice_number: "INV-1".to_string(),
            entry: payment_entry(500.0, 1),
        },
        SiteMutation::RecordPayment {
            supplier_id: "sup-1".to_string(),
            invoice_number: "INV-404".to_string(),
            entry: payment_entry(500.0, 2),
        },
    ])
    .apply(&snapshot, &RollupConfig::default());

    assert!(matches!(result, Err(RollupError::NotFound { .. })));
    assert!(snapshot.payments.is_empty());
}

#[test]
fn test_grouping_ignores_row_order() {
    let mut invoices = Vec::new();
    for (i, (supplier, number)) in [
        ("sup-a", "A-1"),
        ("sup-a", "A-1"),
        ("sup-a", "A-2"),
        ("sup-b", "A-1"),
        ("sup-b", "B-9"),
        ("sup-b", "B-9"),
        ("sup-b", "B-9"),
    ]
    .iter()
    .enumerate()
    {
        invoices.push(grn(
            &format!("g{}", i),
            "s1",
            supplier,
            number,
            (i as u32) + 1,
            1_000.0 * (i as f64 + 1.0),
        ));
    }
    let suppliers = vec![
        Supplier {
            id: "sup-a".to_string(),
            name: "Alpha Steel".to_string(),
        },
        Supplier {
            id: "sup-b".to_string(),
            name: "Beta Aggregates".to_string(),
        },
    ];

    let expected = group_invoices(&invoices, &suppliers);
    assert_eq!(expected.len(), 4);

    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..10 {
        let mut shuffled = invoices.clone();
        shuffled.shuffle(&mut rng);
        let groups = group_invoices(&shuffled, &suppliers);

        assert_eq!(groups.len(), expected.len());
        for group in &groups {
            let reference = expected.iter().find(|g| g.key == group.key).unwrap();
            assert!((group.total_with_gst - reference.total_with_gst).abs() < 1e-9);
            assert_eq!(group.latest_grn_date, reference.latest_grn_date);
            assert_eq!(group.entries.len(), reference.entries.len());
        }
    }
}

#[test]
fn test_sparse_expenses_fill_every_day() {
    let mut snapshot = site("s1", "Riverside Towers");
    let mason = RateMaster {
        id: "mason".to_string(),
        name: "Mason".to_string(),
        hourly_rate: 62.5,
    };
    snapshot.expenses.manpower.push(RatedExpense::from_master(
        "mp1",
        "s1",
        date(2024, 8, 3),
        &mason,
        8.0,
    ));
    snapshot
        .expenses
        .material
        .push(expense("e-elsewhere", "s2", date(2024, 8, 3), 9_999.0));

    let range = DateRange::new(date(2024, 8, 1), date(2024, 8, 7));
    let report =
        SiteRollupProcessor::process_with_expenses(&snapshot, range, &RollupConfig::default()).unwrap();
    let dashboard = report.expenses.unwrap();

    assert_eq!(dashboard.days.len(), 7);
    assert_eq!(dashboard.days[2].date, date(2024, 8, 3));
    assert_eq!(dashboard.days[2].total, 500.0);
    assert_eq!(dashboard.days[2].amounts.manpower, 500.0);
    assert!(dashboard
        .days
        .iter()
        .filter(|d| d.date != date(2024, 8, 3))
        .all(|d| d.total == 0.0));
    assert_eq!(dashboard.grand_total, 500.0);
    assert!((dashboard.daily_average - 71.43).abs() < 0.01);
}

#[test]
fn test_billing_csv_reads_back() {
    let mut snapshot = site("s1", "Riverside Towers");
    add_headline(&mut snapshot, "h1", 1, "Doors, windows and frames");
    add_line_item(&mut snapshot, "h1", "li1", "4.1");
    add_line_item(&mut snapshot, "h1", "li2", "4.2");
    sign_checklist(&mut snapshot, "li1");
    approve_jmr(&mut snapshot, "li1");

    let report = process_site(&snapshot, &RollupConfig::default()).unwrap();
    let csv_text = report.billing_summary().to_csv();

    let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.len(), 14);
    assert_eq!(&headers[6], "DC");
    assert_eq!(&headers[13], "Ready For Billing");

    let records: Vec<csv::StringRecord> = reader.records().collect::<std::result::Result<_, _>>().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(&records[0][1], "Doors, windows and frames");
    assert_eq!(&records[0][2], "4.1");
    // no materials: the four document facets are NA
    assert_eq!(&records[0][6], "NA");
    assert_eq!(&records[0][12], "100");
    assert_eq!(&records[0][13], "Yes");
    assert_eq!(&records[1][10], "N");
    assert_eq!(&records[1][13], "No");
}

#[test]
fn test_snapshot_and_mutations_from_json() -> anyhow::Result<()> {
    let snapshot: SiteSnapshot = serde_json::from_str(
        r#"{
            "site": { "id": "s9", "name": "Hilltop Villas" },
            "boq": {
                "packages": [{ "id": "p1", "site_id": "s9", "name": "Finishing" }],
                "headlines": [{ "id": "h1", "package_id": "p1", "serial_number": 1, "name": "Painting" }],
                "line_items": [{ "id": "li1", "headline_id": "h1", "item_number": "1.1",
                                 "description": "Exterior paint", "unit": "sqm", "quantity": 640 }],
                "materials": [{ "id": "m1", "line_item_id": "li1", "name": "Primer",
                                "material_type": "direct", "unit": "l" }]
            }
        }"#,
    )?;

    let config = RollupConfig::default();
    let before = process_site(&snapshot, &config)?;
    assert_eq!(before.rollup.headlines[0].line_items[0].readiness.dc.status, FacetStatus::N);

    let batch: MutationBatch = serde_json::from_str(
        r#"{
            "mutations": [
                { "action": "set_document_applicability",
                  "owner": { "kind": "material", "material_id": "m1" },
                  "document_type": "test_certificate", "is_applicable": false },
                { "action": "attach_document_file",
                  "owner": { "kind": "material", "material_id": "m1" },
                  "document_type": "dc",
                  "file_path": "s9/material/m1/dc/1717000000000_dc.pdf",
                  "file_name": "dc.pdf",
                  "uploaded_at": "2024-05-29T10:00:00Z" }
            ]
        }"#,
    )?;

    let outcome = batch.apply(&snapshot, &config)?;
    let after = process_site(&outcome.snapshot, &config)?;
    let item = &after.rollup.headlines[0].line_items[0];
    assert_eq!(item.readiness.dc.status, FacetStatus::Y);
    assert_eq!(item.readiness.test_certificate.status, FacetStatus::NA);
    assert_eq!(item.readiness.mir.status, FacetStatus::N);
    assert!(item.progress > before.rollup.headlines[0].line_items[0].progress);

    verify_report(&after, 0.01)?;
    Ok(())
}

#[tokio::test]
async fn test_session_loads_report_and_expenses() {
    let mut snapshot = site("s1", "Riverside Towers");
    add_headline(&mut snapshot, "h1", 1, "Plastering");
    add_line_item(&mut snapshot, "h1", "li1", "1.1");
    snapshot.grn.invoices.push(grn("g1", "s1", "sup-1", "INV-1", 2, 2_000.0));
    snapshot
        .expenses
        .material
        .push(expense("e1", "s1", date(2024, 8, 2), 1_200.0));
    snapshot
        .expenses
        .material
        .push(expense("e-late", "s1", date(2024, 9, 2), 800.0));

    let session = RollupSession::new(
        InMemorySource::new().with_snapshot(snapshot),
        RollupConfig::default(),
    )
    .unwrap();

    let range = DateRange::new(date(2024, 8, 1), date(2024, 8, 31));
    let loaded = session.load_site_report_with_expenses("s1", range).await;
    assert!(loaded.is_fresh());
    let report = loaded.into_view().unwrap();
    assert_eq!(report.invoice_groups.len(), 1);
    let dashboard = report.expenses.unwrap();
    assert_eq!(dashboard.days.len(), 31);
    assert_eq!(dashboard.grand_total, 1_200.0);

    match session.load_site_report("missing").await {
        Loaded::Failed { error, fallback } => {
            assert!(matches!(error, RollupError::NotFound { .. }));
            assert_eq!(fallback.site_id, "missing");
            assert_eq!(fallback.rollup.overall_progress, 0);
        }
        other => panic!("expected a failed load, got {:?}", other.is_fresh()),
    }
}

#[test]
fn test_schema_generation() {
    let schema = SiteSnapshot::generate_json_schema();
    let json = serde_json::to_string_pretty(&schema).unwrap();
    assert!(json.contains("grn"));
    assert!(json.contains("payments"));

    let mutation_schema = serde_json::to_string(&MutationBatch::generate_json_schema()).unwrap();
    assert!(mutation_schema.contains("record_payment"));
}
