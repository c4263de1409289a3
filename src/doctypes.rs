//! Registro de fichas: normalizadores por tipo de documento y
//! generación múltiple.
//!
//! Cada ficha renombra los campos del registro del prospecto al
//! vocabulario que espera su tabla de mapeo. Los normalizadores son
//! tablas estáticas de reglas puras: elegir el primer campo con valor,
//! convertir booleanos a `"X"` o componer el nombre completo.

use chrono::Local;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::assembler::{self, sanitize_for_filename_upper, GeneratedDocument, TemplateKind};
use crate::error::{DocumentError, Result};
use crate::mapping::MappingCache;
use crate::storage::DocumentStorage;

/// Regla de normalización de un campo de salida.
#[derive(Debug)]
pub enum FieldRule {
    /// Primer campo de origen con valor no vacío.
    Pick(&'static [&'static str]),
    /// Primer campo con valor; si ninguno, la fecha de hoy `DD/MM/YYYY`.
    PickOrToday(&'static [&'static str]),
    /// `"X"` si el origen es verdadero (`true`/`"si"`/`"x"`/`"1"`), vacío si no.
    Bool(&'static str),
    /// Nombre completo del cliente desde sus partes.
    FullName,
}

#[derive(Debug)]
pub struct FichaSpec {
    pub ficha: &'static str,
    /// Formato destino en la tabla de `assembler`.
    pub formato: &'static str,
    pub fields: &'static [(&'static str, FieldRule)],
}

use FieldRule::{Bool, FullName, Pick, PickOrToday};

const IDENTIFICACION_CLIENTE: &[(&str, FieldRule)] = &[
    ("codigo_de_prospecto", Pick(&["codigo_de_prospecto", "id_expediente"])),
    ("codigo_de_cliente", Pick(&["codigo_de_cliente"])),
    ("fecha_identificacion", PickOrToday(&["fecha_identificacion_cliente"])),
    ("cliente_primer_nombre", Pick(&["primer_nombre"])),
    ("cliente_segundo_nombre", Pick(&["segundo_nombre"])),
    ("cliente_apellido_paterno", Pick(&["primer_apellido"])),
    ("cliente_apellido_materno", Pick(&["segundo_apellido"])),
    ("cliente_fecha_de_nacimiento", Pick(&["fecha_nacimiento"])),
    ("cliente_sexo", Pick(&["sexo"])),
    ("cliente_curp", Pick(&["curp", "cedula"])),
    ("cliente_rfc", Pick(&["rfc"])),
    ("cliente_escolaridad", Pick(&["escolaridad"])),
    ("cliente_correo_electronico", Pick(&["correo"])),
    ("cliente_clave_de_elector", Pick(&["clave_de_elector"])),
    ("cliente_nacionalidad", Pick(&["nacionalidad"])),
    ("cliente_estado_de_nacimiento", Pick(&["estado_nacimiento"])),
    ("cliente_pais_de_nacimiento", Pick(&["direccion_pais"])),
    ("cliente_profesion", Pick(&["profesion"])),
    ("cliente_dependientes_economicos", Pick(&["dependientes_economicos"])),
    ("estado_civil", Pick(&["estado_civil"])),
    ("cliente_uso_de_redes_sociales", Pick(&["uso_redes_sociales"])),
    ("cliente_uso_de_redes_sociales_cual", Pick(&["redes_sociales_cual"])),
    ("cliente_uso_de_redes_sociales_usuario", Pick(&["usuario_redes_sociales"])),
    ("cliente_efirma", Pick(&["efirma"])),
    ("cliente_efirma_si", Bool("efirma_si")),
    ("cliente_efirma_no", Bool("efirma_no")),
    ("datos_del_domicilio_telefono", Pick(&["telefono"])),
    ("datos_del_domicilio_pais", Pick(&["direccion_pais"])),
    ("datos_del_domicilio_estado", Pick(&["direccion_provincia"])),
    ("datos_del_domicilio_localidad", Pick(&["direccion_ciudad"])),
    ("datos_del_domicilio_municipio", Pick(&["municipio"])),
    ("datos_del_domicilio_la_casa_es", Pick(&["la_casa_es"])),
    ("datos_del_domicilio_referencia_de_localizacion", Pick(&["referencia_localizacion"])),
    ("datos_del_domicilio_direccion_calle", Pick(&["direccion_calle"])),
    ("datos_del_domicilio_direccion_numero", Pick(&["direccion_numero"])),
    ("datos_del_domicilio_direccion_colonia_o_barrio", Pick(&["direccion_colonia"])),
    ("datos_del_domicilio_direccion_codigo_postal", Pick(&["codigo_postal"])),
    ("actividad_economica_ocupacion", Pick(&["ocupacion"])),
    ("actividad_economica_sector", Pick(&["sector"])),
    ("actividad_economica_negocio", Pick(&["negocio"])),
    ("actividad_economica_negocio_a_emprender", Pick(&["negocio_a_emprender"])),
    ("actividad_economica_ubicacion_del_negocio", Pick(&["ubicacion_negocio"])),
    ("actividad_economica_local", Pick(&["local"])),
    ("actividad_economica_anios_en_el_oficio", Pick(&["anios_oficio"])),
    ("actividad_economica_anios_en_el_negocio", Pick(&["anios_negocio"])),
    ("actividad_economica_numero_de_trabajadores", Pick(&["numero_trabajadores"])),
    ("actividad_economica_horario", Pick(&["horario"])),
    ("actividad_economica_telefono", Pick(&["telefono_trabajo"])),
    ("actividad_economica_pais", Pick(&["trabajo_pais"])),
    ("actividad_economica_estado", Pick(&["trabajo_estado"])),
    ("actividad_economica_municipio", Pick(&["trabajo_municipio"])),
    ("actividad_economica_localidad", Pick(&["trabajo_localidad"])),
    ("actividad_economica_referencia_de_localizacion", Pick(&["trabajo_referencia"])),
    ("actividad_economica_direccion_calle", Pick(&["trabajo_calle"])),
    ("actividad_economica_direccion_numero", Pick(&["trabajo_numero"])),
    ("actividad_economica_direccion_colonia_o_barrio", Pick(&["trabajo_colonia"])),
    ("actividad_economica_direccion_codigo_postal", Pick(&["trabajo_codigo_postal"])),
    ("actividad_economica_trabaja_lunes", Bool("trabaja_lunes")),
    ("actividad_economica_trabaja_martes", Bool("trabaja_martes")),
    ("actividad_economica_trabaja_miercoles", Bool("trabaja_miercoles")),
    ("actividad_economica_trabaja_jueves", Bool("trabaja_jueves")),
    ("actividad_economica_trabaja_viernes", Bool("trabaja_viernes")),
    ("actividad_economica_trabaja_sabado", Bool("trabaja_sabado")),
    ("actividad_economica_trabaja_domingo", Bool("trabaja_domingo")),
    ("actividad_economica_tiene_otro_ingreso", Bool("tiene_otro_ingreso")),
    ("actividad_economica_tiene_otro_ingreso_cual", Pick(&["otro_ingreso_cual"])),
    ("obligado_solidario_primer_nombre", Pick(&["obligado_primer_nombre"])),
    ("obligado_solidario_segundo_nombre", Pick(&["obligado_segundo_nombre"])),
    ("obligado_solidario_apellido_paterno", Pick(&["obligado_apellido_paterno"])),
    ("obligado_solidario_apellido_materno", Pick(&["obligado_apellido_materno"])),
    ("obligado_solidario_fecha_de_nacimiento", Pick(&["obligado_fecha_nacimiento"])),
    ("obligado_solidario_estado_de_nacimiento", Pick(&["obligado_estado_nacimiento"])),
    ("obligado_solidario_escolaridad", Pick(&["obligado_escolaridad"])),
    ("obligado_solidario_parentesco", Pick(&["obligado_parentesco"])),
    ("obligado_solidario_lugar_de_trabajo", Pick(&["obligado_lugar_trabajo"])),
    ("obligado_solidario_actividad_u_ocupacion", Pick(&["obligado_ocupacion"])),
    ("obligado_solidario_clave_de_elector", Pick(&["obligado_clave_elector"])),
    ("obligado_solidario_curp", Pick(&["obligado_curp"])),
    ("datos_del_beneficiario_nombres", Pick(&["beneficiario_nombres"])),
    ("datos_del_beneficiario_apellidos", Pick(&["beneficiario_apellidos"])),
    ("datos_del_beneficiario_fecha_de_nacimiento", Pick(&["beneficiario_fecha_nacimiento"])),
    ("datos_del_beneficiario_sexo", Pick(&["beneficiario_sexo"])),
    ("datos_del_beneficiario_parentesco", Pick(&["beneficiario_parentesco"])),
    ("datos_del_beneficiario_participacion", Pick(&["beneficiario_participacion"])),
    ("datos_del_beneficiario_direccion", Pick(&["beneficiario_direccion"])),
    ("declaratorias_actuo_a_nombre_y_cuenta_propia", Bool("actuo_cuenta_propia")),
    ("declaratorias_actuo_a_nombre_de_un_tercero", Bool("actuo_nombre_tercero")),
    ("declaratorias_tengo_relacion", Bool("tengo_relacion")),
    ("declaratorias_soy_accionista", Bool("soy_accionista")),
    ("declaratorias_autorizo_a_financiera_mandarme_informacion", Bool("autorizo_informacion")),
    ("declaratorias_como_se_entero_o_quien_recomendo", Pick(&["como_se_entero"])),
    ("declaratorias_tercero_primer_nombre", Pick(&["tercero_primer_nombre"])),
    ("declaratorias_tercero_segundo_nombre", Pick(&["tercero_segundo_nombre"])),
    ("declaratorias_tercero_apellido_paterno", Pick(&["tercero_apellido_paterno"])),
    ("declaratorias_tercero_apellido_materno", Pick(&["tercero_apellido_materno"])),
];

const VISITA_DOMICILIARIA: &[(&str, FieldRule)] = &[
    ("wa_id", Pick(&["wa_id"])),
    ("codigo_de_prospecto", Pick(&["codigo_de_prospecto", "id_expediente"])),
    ("nombre_del_cliente", FullName),
    ("fecha", PickOrToday(&["fecha_visita", "fecha"])),
    ("grupo_al_que_pertenece", Pick(&["grupo"])),
    ("asesor", Pick(&["nombre_asesor"])),
    ("sucursal", Pick(&["sucursal_asesor", "nombre_sucursal"])),
    ("direccion_vialidad", Pick(&["direccion_calle", "datos_del_domicilio_direccion_calle"])),
    ("direccion_numero", Pick(&["direccion_numero", "datos_del_domicilio_direccion_numero"])),
    ("direccion_colonia", Pick(&["direccion_colonia", "datos_del_domicilio_direccion_colonia_o_barrio"])),
    ("direccion_ciudad", Pick(&["direccion_ciudad", "datos_del_domicilio_localidad"])),
    ("direccion_municipio", Pick(&["direccion_municipio", "datos_del_domicilio_municipio"])),
    ("direccion_estado", Pick(&["direccion_provincia", "datos_del_domicilio_estado"])),
    ("direccion_codigo_postal", Pick(&["codigo_postal", "datos_del_domicilio_direccion_codigo_postal"])),
    ("direccion_coincide_si", Bool("direccion_coincide_si")),
    ("direccion_coincide_no", Bool("direccion_coincide_no")),
    ("observaciones_domicilio_del_cliente", Pick(&["observaciones_domicilio", "observaciones_domicilio_del_cliente"])),
    ("caracteristicas_principales_de_la_casa", Pick(&["la_casa_es", "datos_del_domicilio_la_casa_es"])),
    ("calles_entre_las_que_se_encuentra_el_domicilio", Pick(&["calles_entre_domicilio", "calles_entre_las_que_se_encuentra_el_domicilio"])),
    ("lineas_o_rutas_de_transporte_para_llegar_a_domicilio", Pick(&["rutas_transporte", "lineas_o_rutas_de_transporte_para_llegar_a_domicilio"])),
    ("tiempo_aproximado_para_llegar_a_domicilio", Pick(&["tiempo_llegar", "tiempo_aproximado_para_llegar_a_domicilio"])),
    ("principales_referencias_de_ubicacion_del_domicilio", Pick(&["referencias_ubicacion", "datos_del_domicilio_referencia_de_localizacion"])),
    ("tiempo_de_vivir_en_domicilio", Pick(&["tiempo_vivir_domicilio", "tiempo_de_vivir_en_domicilio"])),
    ("nombre_de_propietario_de_la_casa", Pick(&["propietario_casa", "nombre_de_propietario_de_la_casa"])),
    ("negocio_misma_direccion_si", Bool("negocio_misma_direccion_si")),
    ("negocio_misma_direccion_no", Bool("negocio_misma_direccion_no")),
    ("negocio_misma_direccion_no_direccion_completa", Pick(&["direccion_negocio_completa"])),
    ("ubicacion_domicilio", Pick(&["ubicacion_domicilio"])),
    ("ubicacion_negocio", Pick(&["ubicacion_negocio"])),
];

const EVALUACION_ECONOMICA_SIMPLE: &[(&str, FieldRule)] = &[
    ("sucursal", Pick(&["sucursal_asesor", "nombre_sucursal"])),
    ("fecha", PickOrToday(&["fecha_evaluacion", "fecha"])),
    ("nombre_del_cliente", FullName),
    ("secuencia", Pick(&["secuencia"])),
    ("actividad_principal", Pick(&["actividad_principal", "actividad_economica_ocupacion"])),
    ("grupo", Pick(&["grupo", "calc_grupo"])),
    ("BC_Score", Pick(&["bc_score", "calc_bcscore"])),
    ("ICC", Pick(&["icc"])),
    ("No_Hit", Pick(&["no_hit"])),
    ("tipo_de_solicitante", Pick(&["tipo_solicitante"])),
    ("monto_solicitado", Pick(&["monto_solicitado"])),
    ("cuota_solicitada", Pick(&["cuota_solicitada"])),
    ("concepto_de_venta_1", Pick(&["concepto_de_venta_1", "concepto_venta_1"])),
    ("concepto_de_venta_2", Pick(&["concepto_de_venta_2", "concepto_venta_2"])),
    ("concepto_de_venta_3", Pick(&["concepto_de_venta_3", "concepto_venta_3"])),
    ("concepto_de_venta_4", Pick(&["concepto_de_venta_4", "concepto_venta_4"])),
    ("concepto_de_venta_5", Pick(&["concepto_de_venta_5", "concepto_venta_5"])),
    ("concepto_de_venta_6", Pick(&["concepto_de_venta_6", "concepto_venta_6"])),
    ("venta_1", Pick(&["venta_1"])),
    ("venta_2", Pick(&["venta_2"])),
    ("venta_3", Pick(&["venta_3"])),
    ("venta_4", Pick(&["venta_4"])),
    ("venta_5", Pick(&["venta_5"])),
    ("venta_6", Pick(&["venta_6"])),
    ("venta_semanal_1", Pick(&["venta_semanal_1"])),
    ("venta_semanal_2", Pick(&["venta_semanal_2"])),
    ("venta_semanal_3", Pick(&["venta_semanal_3"])),
    ("venta_semanal_4", Pick(&["venta_semanal_4"])),
    ("venta_semanal_5", Pick(&["venta_semanal_5"])),
    ("venta_semanal_6", Pick(&["venta_semanal_6"])),
    ("venta_quincenal_1", Pick(&["venta_quincenal_1"])),
    ("venta_quincenal_2", Pick(&["venta_quincenal_2"])),
    ("venta_quincenal_3", Pick(&["venta_quincenal_3"])),
    ("venta_quincenal_4", Pick(&["venta_quincenal_4"])),
    ("venta_quincenal_5", Pick(&["venta_quincenal_5"])),
    ("venta_quincenal_6", Pick(&["venta_quincenal_6"])),
    ("venta_mensual_1", Pick(&["venta_mensual_1"])),
    ("venta_mensual_2", Pick(&["venta_mensual_2"])),
    ("venta_mensual_3", Pick(&["venta_mensual_3"])),
    ("venta_mensual_4", Pick(&["venta_mensual_4"])),
    ("venta_mensual_5", Pick(&["venta_mensual_5"])),
    ("venta_mensual_6", Pick(&["venta_mensual_6"])),
    ("costo_1", Pick(&["costo_1"])),
    ("costo_2", Pick(&["costo_2"])),
    ("costo_3", Pick(&["costo_3"])),
    ("costo_4", Pick(&["costo_4"])),
    ("costo_5", Pick(&["costo_5"])),
    ("costo_6", Pick(&["costo_6"])),
    ("gastos_personales", Pick(&["gastos_personales"])),
    ("gastos_generales", Pick(&["gastos_generales"])),
    ("gastos_financieros", Pick(&["gastos_financieros"])),
    ("otros_gastos", Pick(&["otros_gastos"])),
    ("costo_de_ventas", Pick(&["costo_de_ventas", "costo_ventas"])),
    ("utilidad_bruta", Pick(&["utilidad_bruta"])),
    ("utilidad_neta", Pick(&["utilidad_neta"])),
    ("ingreso_de_ganancia_1", Pick(&["ingreso_de_ganancia_1", "ingreso_ganancia_1", "porcentaje_de_ganancia_1"])),
    ("ingreso_de_ganancia_2", Pick(&["ingreso_de_ganancia_2", "ingreso_ganancia_2", "porcentaje_de_ganancia_2"])),
    ("ingreso_de_ganancia_3", Pick(&["ingreso_de_ganancia_3", "ingreso_ganancia_3", "porcentaje_de_ganancia_3"])),
    ("ingreso_de_ganancia_4", Pick(&["ingreso_de_ganancia_4", "ingreso_ganancia_4", "porcentaje_de_ganancia_4"])),
    ("ingreso_de_ganancia_5", Pick(&["ingreso_de_ganancia_5", "ingreso_ganancia_5", "porcentaje_de_ganancia_5"])),
    ("ingreso_de_ganancia_6", Pick(&["ingreso_de_ganancia_6", "ingreso_ganancia_6", "porcentaje_de_ganancia_6"])),
    ("porcentaje_de_ganancia_1", Pick(&["porcentaje_de_ganancia_1", "ingreso_de_ganancia_1"])),
    ("porcentaje_de_ganancia_2", Pick(&["porcentaje_de_ganancia_2", "ingreso_de_ganancia_2"])),
    ("porcentaje_de_ganancia_3", Pick(&["porcentaje_de_ganancia_3", "ingreso_de_ganancia_3"])),
    ("porcentaje_de_ganancia_4", Pick(&["porcentaje_de_ganancia_4", "ingreso_de_ganancia_4"])),
    ("porcentaje_de_ganancia_5", Pick(&["porcentaje_de_ganancia_5", "ingreso_de_ganancia_5"])),
    ("porcentaje_de_ganancia_6", Pick(&["porcentaje_de_ganancia_6", "ingreso_de_ganancia_6"])),
    ("inventarios_activo", Pick(&["inventarios_activo"])),
    ("caja_efectivo_activo", Pick(&["caja_efectivo_activo"])),
    ("ahorro_bancos_activo", Pick(&["ahorro_bancos_activo"])),
    ("cuentas_por_cobrar_activo", Pick(&["cuentas_por_cobrar_activo", "cuentas_cobrar_activo"])),
    ("inventarios_pasivo", Pick(&["inventarios_pasivo"])),
    ("mobiliario_maquinaria_equipo_activo", Pick(&["mobiliario_maquinaria_equipo_activo", "mobiliario_activo"])),
    ("mobiliario_maquinaria_equipo_pasivo", Pick(&["mobiliario_maquinaria_equipo_pasivo", "mobiliario_pasivo"])),
    ("local_u_otros_bienes_del_negocio_activo", Pick(&["local_u_otros_bienes_del_negocio_activo", "local_activo"])),
    ("local_u_otros_bienes_del_negocio_pasivo", Pick(&["local_u_otros_bienes_del_negocio_pasivo", "local_pasivo"])),
    ("comentarios_y_observaciones_adicionales", Pick(&["comentarios_y_observaciones_adicionales", "comentarios_observaciones"])),
    ("monto_mayor_credito_obtenido", Pick(&["monto_mayor_credito_obtenido", "monto_mayor_credito"])),
    ("monto_credito_anterior", Pick(&["monto_credito_anterior"])),
    ("cuota_anterior", Pick(&["cuota_anterior"])),
    ("pago_a_la_semana", Pick(&["pago_a_la_semana", "pago_semanal"])),
];

const OBLIGADO_SOLIDARIO: &[(&str, FieldRule)] = &[
    ("codigo", Pick(&["codigo_de_prospecto", "id_expediente"])),
    ("fecha", PickOrToday(&["fecha"])),
    ("wa_id", Pick(&["wa_id"])),
    ("codigo_de_prospecto", Pick(&["codigo_de_prospecto", "id_expediente"])),
    ("obligado.primer_nombre", Pick(&["obligado_primer_nombre"])),
    ("obligado.segundo_nombre", Pick(&["obligado_segundo_nombre"])),
    ("obligado.apellido_paterno", Pick(&["obligado_apellido_paterno"])),
    ("obligado.apellido_materno", Pick(&["obligado_apellido_materno"])),
    ("obligado.clave_de_elector", Pick(&["obligado_clave_elector"])),
    ("obligado.CURP", Pick(&["obligado_curp"])),
    ("obligado.RFC", Pick(&["obligado_rfc"])),
    ("obligado.firma_electronica", Pick(&["obligado_firma_electronica"])),
    ("obligado.nacionalidad", Pick(&["obligado_nacionalidad"])),
    ("obligado.pais_de_nacimiento", Pick(&["obligado_pais_nacimiento"])),
    ("obligado.estado_de_nacimiento", Pick(&["obligado_estado_nacimiento"])),
    ("obligado.fecha_de_nacimiento", Pick(&["obligado_fecha_nacimiento"])),
    ("obligado.estado_civil", Pick(&["obligado_estado_civil"])),
    ("obligado.depentientes_economicos", Pick(&["obligado_dependientes_economicos"])),
    ("obligado.sexo", Pick(&["obligado_sexo"])),
    ("obligado.escolaridad", Pick(&["obligado_escolaridad"])),
    ("obligado.actividad", Pick(&["obligado_actividad"])),
    ("obligado.profesion", Pick(&["obligado_profesion"])),
    ("obligado.ocupacion", Pick(&["obligado_ocupacion"])),
    ("domicilio.direccion_calle", Pick(&["obligado_direccion_calle"])),
    ("domicilio.direccion_numero", Pick(&["obligado_direccion_numero"])),
    ("domicilio.direccion_colonia", Pick(&["obligado_direccion_colonia"])),
    ("domicilio.direccion_ciudad", Pick(&["obligado_direccion_ciudad"])),
    ("domicilio.codigo_postal", Pick(&["obligado_codigo_postal"])),
    ("domicilio.municipio", Pick(&["obligado_municipio"])),
    ("domicilio.estado", Pick(&["obligado_estado"])),
    ("domicilio.pais", Pick(&["obligado_pais"])),
    ("domicilio.referecia_localizacion", Pick(&["obligado_referencia_localizacion"])),
    ("domicilio.la_casa_es", Pick(&["obligado_la_casa_es"])),
    ("domicilio.telefono", Pick(&["obligado_telefono"])),
    ("cargo_publico.si", Pick(&["obligado_cargo_publico_si"])),
    ("cargo_publico.no", Pick(&["obligado_cargo_publico_no"])),
    ("cargo_publico.familiares.si", Pick(&["obligado_cargo_publico_familiares_si"])),
    ("cargo_publico.familiares.no", Pick(&["obligado_cargo_publico_familiares_no"])),
    ("protesta.es_accionista", Pick(&["obligado_es_accionista"])),
    ("protesta.tiene_relacion_con_accionista", Pick(&["obligado_tiene_relacion_accionista"])),
];

const AVAL: &[(&str, FieldRule)] = &[
    ("codigo", Pick(&["codigo_de_prospecto", "id_expediente"])),
    ("fecha", PickOrToday(&["fecha"])),
    ("wa_id", Pick(&["wa_id"])),
    ("codigo_de_prospecto", Pick(&["codigo_de_prospecto", "id_expediente"])),
    ("numero_aval", Pick(&["numero_aval"])),
    ("aval.primer_nombre", Pick(&["aval_primer_nombre"])),
    ("aval.segundo_nombre", Pick(&["aval_segundo_nombre"])),
    ("aval.apellido_paterno", Pick(&["aval_apellido_paterno"])),
    ("aval.apellido_materno", Pick(&["aval_apellido_materno"])),
    ("aval.clave_de_elector", Pick(&["aval_clave_elector"])),
    ("aval.CURP", Pick(&["aval_curp"])),
    ("aval.RFC", Pick(&["aval_rfc"])),
    ("aval.firma_electronica", Pick(&["aval_firma_electronica"])),
    ("aval.nacionalidad", Pick(&["aval_nacionalidad"])),
    ("aval.pais_de_nacimiento", Pick(&["aval_pais_nacimiento"])),
    ("aval.estado_de_nacimiento", Pick(&["aval_estado_nacimiento"])),
    ("aval.fecha_de_nacimiento", Pick(&["aval_fecha_nacimiento"])),
    ("aval.estado_civil", Pick(&["aval_estado_civil"])),
    ("aval.depentientes_economicos", Pick(&["aval_dependientes_economicos"])),
    ("aval.sexo", Pick(&["aval_sexo"])),
    ("aval.escolaridad", Pick(&["aval_escolaridad"])),
    ("aval.actividad", Pick(&["aval_actividad"])),
    ("aval.profesion", Pick(&["aval_profesion"])),
    ("aval.ocupacion", Pick(&["aval_ocupacion"])),
    ("domicilio.direccion_calle", Pick(&["aval_direccion_calle"])),
    ("domicilio.direccion_numero", Pick(&["aval_direccion_numero"])),
    ("domicilio.direccion_colonia", Pick(&["aval_direccion_colonia"])),
    ("domicilio.direccion_ciudad", Pick(&["aval_direccion_ciudad"])),
    ("domicilio.codigo_postal", Pick(&["aval_codigo_postal"])),
    ("domicilio.municipio", Pick(&["aval_municipio"])),
    ("domicilio.estado", Pick(&["aval_estado"])),
    ("domicilio.pais", Pick(&["aval_pais"])),
    ("domicilio.referecia_localizacion", Pick(&["aval_referencia_localizacion"])),
    ("domicilio.la_casa_es", Pick(&["aval_la_casa_es"])),
    ("domicilio.telefono", Pick(&["aval_telefono"])),
    ("pareja.apellido_paterno", Pick(&["aval_pareja_apellido_paterno"])),
    ("pareja.apellido_materno", Pick(&["aval_pareja_apellido_materno"])),
    ("pareja.primer_nombre", Pick(&["aval_pareja_primer_nombre"])),
    ("pareja.segundo_nombre", Pick(&["aval_pareja_segundo_nombre"])),
    ("pareja.estado_de_nacimiento", Pick(&["aval_pareja_estado_nacimiento"])),
    ("pareja.fecha_de_nacimiento", Pick(&["aval_pareja_fecha_nacimiento"])),
    ("pareja.ocupacion", Pick(&["aval_pareja_ocupacion"])),
    ("pareja.lugar_de_trabajo", Pick(&["aval_pareja_lugar_trabajo"])),
    ("pareja.clave_de_elector", Pick(&["aval_pareja_clave_elector"])),
    ("pareja.CURP", Pick(&["aval_pareja_curp"])),
    ("pareja.escolaridad", Pick(&["aval_pareja_escolaridad"])),
    ("cargo_publico.si", Pick(&["aval_cargo_publico_si"])),
    ("cargo_publico.no", Pick(&["aval_cargo_publico_no"])),
    ("cargo_publico.familiares.si", Pick(&["aval_cargo_publico_familiares_si"])),
    ("cargo_publico.familiares.no", Pick(&["aval_cargo_publico_familiares_no"])),
    ("protesta.es_accionista", Pick(&["aval_es_accionista"])),
    ("protesta.tiene_relacion_con_accionista", Pick(&["aval_tiene_relacion_accionista"])),
];

const SCORING_COMUN: &[(&str, FieldRule)] = &[
    ("codigo_de_prospecto", Pick(&["codigo_de_prospecto", "id_expediente"])),
    ("nombre", FullName),
    ("apellido_paterno", Pick(&["primer_apellido", "apellido_paterno", "cliente_apellido_paterno"])),
    ("apellido_materno", Pick(&["segundo_apellido", "apellido_materno", "cliente_apellido_materno"])),
    ("telefono", Pick(&["telefono", "datos_del_domicilio_telefono"])),
    ("email", Pick(&["correo", "cliente_correo_electronico"])),
    ("curp", Pick(&["curp", "cliente_curp", "cedula"])),
    ("fecha_nacimiento", Pick(&["fecha_nacimiento", "fecha_de_nacimiento", "cliente_fecha_de_nacimiento"])),
    ("edad", Pick(&["edad"])),
    ("estado_civil", Pick(&["estado_civil"])),
    ("sexo", Pick(&["sexo", "cliente_sexo"])),
    ("calle", Pick(&["direccion_calle", "datos_del_domicilio_direccion_calle"])),
    ("numero", Pick(&["direccion_numero", "datos_del_domicilio_direccion_numero"])),
    ("colonia", Pick(&["direccion_colonia", "datos_del_domicilio_direccion_colonia_o_barrio"])),
    ("codigo_postal", Pick(&["codigo_postal", "datos_del_domicilio_direccion_codigo_postal", "codigo_postal_cliente"])),
    ("municipio", Pick(&["municipio", "datos_del_domicilio_municipio"])),
    ("estado", Pick(&["direccion_provincia", "datos_del_domicilio_estado", "estado_cliente"])),
    ("ocupacion", Pick(&["ocupacion", "actividad_economica_ocupacion"])),
    ("anos_en_el_negocio", Pick(&["anios_negocio", "actividad_economica_anios_en_el_negocio"])),
    ("la_casa_es", Pick(&["la_casa_es", "datos_del_domicilio_la_casa_es"])),
    ("cuanto_ganas", Pick(&["cuanto_ganas"])),
    ("cuanto_gastas", Pick(&["cuanto_gastas"])),
    ("pagos_mensuales_creditos", Pick(&["pagos_mensuales_creditos"])),
    ("egresos_mensuales", Pick(&["egresos_mensuales"])),
    ("ultima_oferta", Pick(&["monto_aceptado"])),
    ("monto_aceptado", Pick(&["monto_aceptado"])),
    ("calc_capacidad_semanal", Pick(&["pago_semanal", "pago_a_la_semana"])),
    ("pago_semanal", Pick(&["pago_semanal", "pago_a_la_semana"])),
    ("referencia1_nombre", Pick(&["referencia1_nombre", "primera_referencia_personal_nombre_completo"])),
    ("referencia1_telefono", Pick(&["referencia1_telefono", "primera_referencia_personal_telefono"])),
    ("referencia2_nombre", Pick(&["referencia2_nombre", "segunda_referencia_personal_nombre_completo"])),
    ("referencia2_telefono", Pick(&["referencia2_telefono", "segunda_referencia_personal_telefono"])),
    ("wa_id", Pick(&["wa_id"])),
];

const SCORING_CON_HC_EXTRA: &[(&str, FieldRule)] = &[
    ("calc_bcscore", Pick(&["bc_score", "calc_bcscore"])),
    ("buro.BC_score", Pick(&["bc_score"])),
    ("buro.ICC", Pick(&["icc"])),
    ("buro.no_hit", Pick(&["no_hit"])),
];

const SCORING_SIN_HC_EXTRA: &[(&str, FieldRule)] = &[
    ("calc_bcscore", Pick(&["calc_bcscore", "bc_score"])),
];

const SEGUIMIENTO_CREDITO: &[(&str, FieldRule)] = &[
    ("codigo_de_prospecto", Pick(&["codigo_de_prospecto", "id_expediente"])),
    ("wa_id", Pick(&["wa_id"])),
    ("nombre_cliente", FullName),
    ("nombre_asesor", Pick(&["nombre_asesor"])),
    ("fecha_previo", PickOrToday(&["fecha_previo"])),
    ("fecha_post", Pick(&["fecha_post"])),
    ("comentarios_previo", Pick(&["comentarios_previo"])),
    ("comentarios_post", Pick(&["comentarios_post"])),
    ("monto_cliente_congruente_si", Bool("monto_cliente_congruente_si")),
    ("monto_cliente_congruente_no", Bool("monto_cliente_congruente_no")),
    ("riesgo_obligaciones_si", Bool("riesgo_obligaciones_si")),
    ("riesgo_obligaciones_no", Bool("riesgo_obligaciones_no")),
    ("riesgo_familiar_credito_si", Bool("riesgo_familiar_credito_si")),
    ("riesgo_familiar_credito_no", Bool("riesgo_familiar_credito_no")),
    ("enfermedad_riesgo_credito_si", Bool("enfermedad_riesgo_credito_si")),
    ("enfermedad_riesgo_credito_no", Bool("enfermedad_riesgo_credito_no")),
    ("autorizacion_gerente_si", Bool("autorizacion_gerente_si")),
    ("autorizacion_gerente_no", Bool("autorizacion_gerente_no")),
    ("problema_funcionamiento_si", Bool("problema_funcionamiento_si")),
    ("problema_funcionamiento_no", Bool("problema_funcionamiento_no")),
    ("mismo_aval_si", Bool("mismo_aval_si")),
    ("mismo_aval_no", Bool("mismo_aval_no")),
    ("credito_aplicado_si", Bool("credito_aplicado_si")),
    ("credito_aplicado_no", Bool("credito_aplicado_no")),
    ("negocio_cambios_si", Bool("negocio_cambios_si")),
    ("presenta_atrasos_si", Bool("presenta_atrasos_si")),
    ("presenta_atrasos_no", Bool("presenta_atrasos_no")),
    ("riesgo_recuperacion_si", Bool("riesgo_recuperacion_si")),
    ("riesgo_recuperacion_no", Bool("riesgo_recuperacion_no")),
    ("problema_cliente_si", Bool("problema_cliente_si")),
    ("problema_cliente_no", Bool("problema_cliente_no")),
    ("que_invertir_1", Pick(&["que_invertir_1"])),
    ("que_invertir_2", Pick(&["que_invertir_2"])),
    ("que_invertir_3", Pick(&["que_invertir_3"])),
    ("que_invertir_4", Pick(&["que_invertir_4"])),
    ("que_invertir_5", Pick(&["que_invertir_5"])),
    ("valor_estimado_1", Pick(&["valor_estimado_1"])),
    ("valor_estimado_2", Pick(&["valor_estimado_2"])),
    ("valor_estimado_3", Pick(&["valor_estimado_3"])),
    ("valor_estimado_4", Pick(&["valor_estimado_4"])),
    ("valor_estimado_5", Pick(&["valor_estimado_5"])),
];

const SCORING_CON_ETIQUETAS: &[(&str, FieldRule)] = &[
    ("nombre_sucursal", Pick(&["sucursal_asesor", "sucursal"])),
    ("fecha", PickOrToday(&["fecha_scoring"])),
    ("nombre_cliente", FullName),
    ("secuencia_de_credito", Pick(&["secuencia", "secuencia_de_credito"])),
    ("tipo_de_vivienda.propia", Bool("vivienda_propia")),
    ("tipo_de_vivienda.rentada", Bool("vivienda_rentada")),
    ("tipo_de_vivienda.habita_en_casa_de_familiar", Bool("vivienda_familiar")),
    ("tipo_de_vivienda.prestada_y_compartida", Bool("vivienda_prestada")),
    ("tipo_de_vivienda.rentada_y_compartida", Bool("vivienda_rentada_compartida")),
    ("tiempo_de_vivir_en_domicilio.mas_de_7_años", Bool("tiempo_domicilio_mas_7")),
    ("tiempo_de_vivir_en_domicilio.entre_5_y_7_años", Bool("tiempo_domicilio_5_7")),
    ("tiempo_de_vivir_en_domicilio.entre_3_y_5_años", Bool("tiempo_domicilio_3_5")),
    ("tiempo_de_vivir_en_domicilio.entre_1_y_3_años", Bool("tiempo_domicilio_1_3")),
    ("tiempo_de_vivir_en_domicilio.1_año_o_menos", Bool("tiempo_domicilio_menos_1")),
    ("impresion_de_situacion_o_vivienda.casa_con_ladrillo", Bool("casa_ladrillo")),
    ("impresion_de_situacion_o_vivienda.casa_en_obra_gris", Bool("casa_obra_gris")),
    ("impresion_de_situacion_o_vivienda.casa_en_obra_negra", Bool("casa_obra_negra")),
    ("impresion_de_situacion_o_vivienda.casa_en_mal_estado", Bool("casa_mal_estado")),
    ("impresion_de_situacion_o_vivienda.casa_en_mal_estado_y_condiciones_deficientes", Bool("casa_condiciones_deficientes")),
    ("edad_del_solicitante.entre_36_y_50_años", Bool("edad_36_50")),
    ("edad_del_solicitante.entre_51_y_74_años", Bool("edad_51_74")),
    ("edad_del_solicitante.entre_26_y_35_años", Bool("edad_26_35")),
    ("edad_del_solicitante.entre_22_y_25_años", Bool("edad_22_25")),
    ("edad_del_solicitante.entre_18_y_21_años", Bool("edad_18_21")),
    ("estado_civil.casado_con_mas_de_3_dependientes", Bool("casado_mas_3_dep")),
    ("estado_civil.casado_con_menos_de_3_dependientes", Bool("casado_menos_3_dep")),
    ("estado_civil.union_libre_con_mas_de_3_años_juntos", Bool("union_libre_mas_3")),
    ("estado_civil.union_libre_con_menos_de_3_años_juntos", Bool("union_libre_menos_3")),
    ("estado_civil.separado_viudo_soltero_sin_dependientes", Bool("separado_viudo_soltero")),
    ("solicitante.recomendado_por_mas_de_3_personas", Bool("recomendado_mas_3")),
    ("solicitante.es_conocido_pero_no_personalmente", Bool("conocido_no_personal")),
    ("solicitante.con_solo_2_referencias", Bool("solo_2_referencias")),
    ("solicitante.con_dificultad_para_referencias_e_informacion_imprecisa", Bool("referencias_imprecisas")),
    ("solicitante.con_dificultad_para_referencias_dudosas_y_comprometidas", Bool("referencias_dudosas")),
    ("tiempo_negocio.mas_de_5_años_con_mismo_giro", Bool("negocio_mas_5_años")),
    ("tiempo_negocio.de_3_a_5_años_con_mismo_giro", Bool("negocio_3_5_años")),
    ("tiempo_negocio.de_1_a_3_años_con_mismo_giro_o_similar", Bool("negocio_1_3_años")),
    ("tiempo_negocio.menos_de_1_año", Bool("negocio_menos_1_año")),
    ("tiempo_negocio.viene_de_otro_giro", Bool("negocio_otro_giro")),
    ("ubicacion_y_tipo.negocio_fijo_local_propio", Bool("negocio_local_propio")),
    ("ubicacion_y_tipo.negocio_fijo_local_rentado", Bool("negocio_local_rentado")),
    ("ubicacion_y_tipo.negocio_semifijo", Bool("negocio_semifijo")),
    ("ubicacion_y_tipo.negocio_ambulante", Bool("negocio_ambulante")),
    ("ubicacion_y_tipo.venta_de_catalogo", Bool("venta_catalogo")),
    ("tipo_de_actividad.produccion_y_transformacion", Bool("actividad_produccion")),
    ("tipo_de_actividad.comercio_y_servicios", Bool("actividad_comercio")),
    ("tipo_de_actividad.artesanales_y_agropecuarias", Bool("actividad_artesanal")),
    ("tipo_de_actividad.venta_por_catalogo", Bool("actividad_catalogo")),
    ("tipo_de_actividad.transportista", Bool("actividad_transporte")),
    ("informacion_financiera.entrega_estados_financieros", Bool("entrega_estados_financieros")),
    ("informacion_financiera.muestra_facturas_que_acreditan_ingresos", Bool("facturas_acreditan_ingresos")),
    ("informacion_financiera.muestra_facturas_que_no_acreditan_ingresos", Bool("facturas_no_acreditan_ingresos")),
    ("informacion_financiera.sin_comprobantes_informacion_no_consistente", Bool("sin_comprobantes_inconsistente")),
    ("informacion_financiera.respestas_evasivas_datos_sin_soporte", Bool("respuestas_evasivas")),
    ("historial_crediticio.interno.0_atrasos_en_ultimo_credito", Bool("historial_0_atrasos")),
    ("historial_crediticio.interno.1_a_5_dias_de_atraso_en_su_ultimo_credito", Bool("historial_1_5_dias")),
    ("historial_crediticio.interno.6_a_15_dias_de_atraso_en_su_ultimo_credito", Bool("historial_6_15_dias")),
    ("historial_crediticio.interno.mora_recurrente_o_mas_de_15_dias_de_atraso_en_su_ultimo_credito", Bool("historial_mora_recurrente")),
    ("historial_crediticio.interno.cliente_nuevo", Bool("historial_cliente_nuevo")),
    ("historial_crediticio.externo.BC_Score_igual_o_mayor_a_601.no_hit_mayor_a_650", Bool("bc_score_601_mas")),
    ("historial_crediticio.externo.BC_Score_de_501_a_600.no_hit_de_601_a_650", Bool("bc_score_501_600")),
    ("historial_crediticio.externo.BC_Score_de_401_a_500.no_hit_de_581_a_600", Bool("bc_score_401_500")),
    ("historial_crediticio.externo.BC_Score_de_301_a_400.no_hit_de_561_a_580", Bool("bc_score_301_400")),
    ("historial_crediticio.externo.BC_Score_menor_a_300.no_hit_igual_o_menor_a_560", Bool("bc_score_menor_300")),
    ("capacidad_de_pago.3_a_1_en_adelante", Bool("capacidad_pago_3_1")),
    ("capacidad_de_pago.entre_2.5_a_1_y_2.9_a_1", Bool("capacidad_pago_25_29")),
    ("capacidad_de_pago.entre_2_a_1_y_2.4_a_1", Bool("capacidad_pago_2_24")),
    ("capacidad_de_pago.entre_1.5_a_1_y_1.9_a_1", Bool("capacidad_pago_15_19")),
    ("capacidad_de_pago.igual_a_1.4_a_1", Bool("capacidad_pago_14")),
];

/// Fichas soportadas. `seguimiento_previo` comparte normalizador con
/// `seguimiento_credito`; `scoring` se resuelve en tiempo de ejecución.
pub const FICHAS: &[FichaSpec] = &[
    FichaSpec { ficha: "identificacion_cliente", formato: "general", fields: IDENTIFICACION_CLIENTE },
    FichaSpec { ficha: "visita_domiciliaria", formato: "visita_domiciliaria", fields: VISITA_DOMICILIARIA },
    FichaSpec { ficha: "evaluacion_economica_simple", formato: "evaluacion_economica", fields: EVALUACION_ECONOMICA_SIMPLE },
    FichaSpec { ficha: "obligado_solidario", formato: "obligado_solidario", fields: OBLIGADO_SOLIDARIO },
    FichaSpec { ficha: "aval", formato: "ficha_aval", fields: AVAL },
    FichaSpec { ficha: "scoring_con_hc", formato: "con_HC", fields: SCORING_COMUN },
    FichaSpec { ficha: "scoring_sin_hc", formato: "sin_HC", fields: SCORING_COMUN },
    FichaSpec { ficha: "scoring_con_etiquetas", formato: "scoring_etiquetas", fields: SCORING_CON_ETIQUETAS },
    FichaSpec { ficha: "seguimiento_credito", formato: "seguimiento", fields: SEGUIMIENTO_CREDITO },
    FichaSpec { ficha: "seguimiento_previo", formato: "seguimiento", fields: SEGUIMIENTO_CREDITO },
];

/// Resuelve el nombre de ficha, aplicando la selección automática de
/// scoring: con buró (`bc_score`/`icc`/`no_hit`) usa con HC.
pub fn resolve_ficha(ficha: &str, datos: &Value) -> Result<&'static FichaSpec> {
    let effective = if ficha == "scoring" {
        let has = |k: &str| !clean(datos.get(k)).is_empty();
        if has("bc_score") || has("icc") || has("no_hit") {
            "scoring_con_hc"
        } else {
            "scoring_sin_hc"
        }
    } else {
        ficha
    };

    FICHAS
        .iter()
        .find(|f| f.ficha == effective)
        .ok_or_else(|| DocumentError::Validation(format!("tipo de ficha no soportado: {ficha}")))
}

/// Aplica el normalizador de la ficha al registro del prospecto.
pub fn normalize(spec: &FichaSpec, datos: &Value) -> Value {
    let mut out = Map::new();
    for (key, rule) in spec.fields {
        let value = match rule {
            Pick(sources) => pick(datos, sources),
            PickOrToday(sources) => {
                let v = pick(datos, sources);
                if v.is_empty() {
                    Local::now().format("%d/%m/%Y").to_string()
                } else {
                    v
                }
            }
            Bool(source) => bool_x(datos.get(*source)),
            FullName => full_name(datos),
        };
        if !value.is_empty() {
            out.insert((*key).to_string(), Value::String(value));
        }
    }

    // Extras de scoring según la variante.
    let extra: &[(&str, FieldRule)] = match spec.ficha {
        "scoring_con_hc" => SCORING_CON_HC_EXTRA,
        "scoring_sin_hc" => SCORING_SIN_HC_EXTRA,
        _ => &[],
    };
    for (key, rule) in extra {
        if let Pick(sources) = rule {
            let value = pick(datos, sources);
            if !value.is_empty() {
                out.insert((*key).to_string(), Value::String(value));
            }
        }
    }

    Value::Object(out)
}

fn clean(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.eq_ignore_ascii_case("null") || t.eq_ignore_ascii_case("undefined") {
                String::new()
            } else {
                t.to_string()
            }
        }
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

fn pick(datos: &Value, sources: &[&str]) -> String {
    sources
        .iter()
        .map(|k| clean(datos.get(*k)))
        .find(|v| !v.is_empty())
        .unwrap_or_default()
}

fn bool_x(v: Option<&Value>) -> String {
    let truthy = match v {
        Some(Value::Bool(b)) => *b,
        _ => matches!(
            clean(v).to_lowercase().as_str(),
            "true" | "1" | "si" | "sí" | "x"
        ),
    };
    if truthy { "X".to_string() } else { String::new() }
}

fn full_name(datos: &Value) -> String {
    let explicit = clean(datos.get("nombre_cliente"));
    if !explicit.is_empty() {
        return explicit;
    }
    let parts = [
        pick(datos, &["primer_nombre", "cliente_primer_nombre"]),
        pick(datos, &["segundo_nombre", "cliente_segundo_nombre"]),
        pick(datos, &["primer_apellido", "apellido_paterno", "cliente_apellido_paterno"]),
        pick(datos, &["segundo_apellido", "apellido_materno", "cliente_apellido_materno"]),
    ];
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Nombre de archivo propio del lote:
/// `APELLIDO_APELLIDO_NOMBRE_CODIGO_ficha.ext`. Las partes vacías se
/// omiten; el tipo de ficha siempre cierra el nombre, así que sin
/// ningún dato del cliente queda `ficha.ext`.
pub fn custom_file_name(datos: &Value, ficha: &str, kind: TemplateKind) -> String {
    let part = |sources: &[&str]| {
        let v = pick(datos, sources);
        if v.is_empty() {
            None
        } else {
            Some(sanitize_for_filename_upper(&v))
        }
    };

    let mut parts: Vec<String> = [
        part(&["primer_apellido", "apellido_paterno", "cliente_apellido_paterno"]),
        part(&["segundo_apellido", "apellido_materno", "cliente_apellido_materno"]),
        part(&["primer_nombre", "cliente_primer_nombre"]),
        part(&["codigo_de_prospecto", "id_expediente"]),
    ]
    .into_iter()
    .flatten()
    .collect();
    parts.push(ficha.to_string());

    let extension = match kind {
        TemplateKind::Excel => "xlsx",
        TemplateKind::Word => "docx",
    };
    format!("{}.{extension}", parts.join("_"))
}

/// Documento generado dentro de un lote.
#[derive(Debug)]
pub struct BatchDocument {
    pub tipo_ficha: String,
    pub document: GeneratedDocument,
}

#[derive(Debug)]
pub struct BatchError {
    pub tipo_ficha: String,
    pub error: String,
}

pub struct BatchOutcome {
    pub documentos: Vec<BatchDocument>,
    pub errores: Vec<BatchError>,
    pub total_solicitados: usize,
}

impl BatchOutcome {
    /// El lote sólo falla cuando no se generó nada.
    pub fn success(&self) -> bool {
        !self.documentos.is_empty()
    }
}

/// Genera una ficha individual: normaliza y delega en el ensamblador,
/// renombrando con el nombre propio del lote.
pub async fn generate_ficha(
    storage: &dyn DocumentStorage,
    cache: &MappingCache,
    secret_phrase: Option<&str>,
    ficha: &str,
    datos: &Value,
) -> Result<GeneratedDocument> {
    let spec = resolve_ficha(ficha, datos)?;
    let normalized = normalize(spec, datos);

    let mut document =
        assembler::build_document(storage, cache, secret_phrase, spec.formato, &normalized).await?;

    let kind = assembler::format_spec(spec.formato).kind;
    document.file_name = custom_file_name(datos, spec.ficha, kind);
    Ok(document)
}

/// Genera varias fichas de un mismo prospecto, acumulando errores por
/// ficha en lugar de abortar el lote.
pub async fn generate_batch(
    storage: &dyn DocumentStorage,
    cache: &MappingCache,
    secret_phrase: Option<&str>,
    fichas: &[String],
    datos: &Value,
) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        documentos: Vec::new(),
        errores: Vec::new(),
        total_solicitados: fichas.len(),
    };

    for ficha in fichas {
        match generate_ficha(storage, cache, secret_phrase, ficha, datos).await {
            Ok(document) => {
                info!("Ficha generada: {}", ficha);
                outcome.documentos.push(BatchDocument {
                    tipo_ficha: ficha.clone(),
                    document,
                });
            }
            Err(e) => {
                error!("Error en ficha {}: {}", ficha, e);
                outcome.errores.push(BatchError {
                    tipo_ficha: ficha.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    #[test]
    fn scoring_auto_selects_by_bureau_presence() {
        let with_buro = json!({"bc_score": "650"});
        let without = json!({"nombre": "Ana"});
        let blank_buro = json!({"bc_score": "  "});

        assert_eq!(resolve_ficha("scoring", &with_buro).unwrap().ficha, "scoring_con_hc");
        assert_eq!(resolve_ficha("scoring", &without).unwrap().ficha, "scoring_sin_hc");
        assert_eq!(resolve_ficha("scoring", &blank_buro).unwrap().ficha, "scoring_sin_hc");
    }

    #[test]
    fn unknown_ficha_is_a_validation_error() {
        let err = resolve_ficha("no_existe", &json!({})).unwrap_err();
        assert_eq!(err.stage(), "validacion");
    }

    #[test]
    fn normalize_renames_and_drops_empty() {
        let spec = resolve_ficha("scoring_con_hc", &json!({})).unwrap();
        let datos = json!({
            "primer_nombre": "Ana",
            "primer_apellido": "Díaz",
            "telefono": "555",
            "bc_score": "0650",
            "correo": ""
        });
        let normalized = normalize(spec, &datos);

        assert_eq!(normalized["nombre"], json!("Ana Díaz"));
        assert_eq!(normalized["apellido_paterno"], json!("Díaz"));
        assert_eq!(normalized["telefono"], json!("555"));
        assert_eq!(normalized["buro.BC_score"], json!("0650"));
        assert!(normalized.get("email").is_none());
    }

    #[test]
    fn bool_fields_become_x_marks() {
        let spec = resolve_ficha("seguimiento_credito", &json!({})).unwrap();
        let datos = json!({
            "mismo_aval_si": true,
            "mismo_aval_no": false,
            "presenta_atrasos_si": "si",
            "presenta_atrasos_no": "no"
        });
        let normalized = normalize(spec, &datos);

        assert_eq!(normalized["mismo_aval_si"], json!("X"));
        assert!(normalized.get("mismo_aval_no").is_none());
        assert_eq!(normalized["presenta_atrasos_si"], json!("X"));
        assert!(normalized.get("presenta_atrasos_no").is_none());
    }

    #[test]
    fn null_text_values_are_treated_as_empty() {
        let spec = resolve_ficha("visita_domiciliaria", &json!({})).unwrap();
        let datos = json!({"grupo": "null", "nombre_asesor": "Luis"});
        let normalized = normalize(spec, &datos);

        assert!(normalized.get("grupo_al_que_pertenece").is_none());
        assert_eq!(normalized["asesor"], json!("Luis"));
    }

    #[test]
    fn custom_file_name_joins_present_parts() {
        let datos = json!({
            "primer_apellido": "Díaz",
            "primer_nombre": "Ana",
            "codigo_de_prospecto": "P-9"
        });

        let name = custom_file_name(&datos, "scoring_con_hc", TemplateKind::Excel);
        assert_eq!(name, "DIAZ_ANA_P_9_scoring_con_hc.xlsx");
    }

    #[test]
    fn custom_file_name_without_client_data_is_just_the_ficha() {
        let name = custom_file_name(&json!({}), "aval", TemplateKind::Word);
        assert_eq!(name, "aval.docx");
    }

    #[tokio::test]
    async fn batch_collects_per_ficha_errors() {
        // Sin plantillas en storage: toda ficha válida falla en la
        // descarga y la desconocida en la validación.
        let storage = MemoryStorage::new();
        let cache = MappingCache::new();
        let fichas = vec!["scoring_con_hc".to_string(), "no_existe".to_string()];

        let outcome = generate_batch(&storage, &cache, None, &fichas, &json!({"nombre": "Ana"})).await;

        assert!(!outcome.success());
        assert_eq!(outcome.total_solicitados, 2);
        assert_eq!(outcome.errores.len(), 2);
        assert!(outcome.documentos.is_empty());
    }

    #[tokio::test]
    async fn batch_succeeds_when_any_ficha_generates() {
        let template = crate::word::tests::minimal_docx("{obligado.primer_nombre}");
        let storage = MemoryStorage::new().with_template(
            "Fichadeidentificaciondelobligadosolidarioconetiquetas.docx",
            template,
        );
        let cache = MappingCache::new();
        let fichas = vec!["obligado_solidario".to_string(), "scoring_con_hc".to_string()];
        let datos = json!({
            "obligado_primer_nombre": "Luis",
            "primer_apellido": "Díaz",
            "primer_nombre": "Ana",
            "codigo_de_prospecto": "P-9"
        });

        let outcome = generate_batch(&storage, &cache, None, &fichas, &datos).await;

        assert!(outcome.success());
        assert_eq!(outcome.documentos.len(), 1);
        assert_eq!(outcome.errores.len(), 1);
        assert_eq!(
            outcome.documentos[0].document.file_name,
            "DIAZ_ANA_P_9_obligado_solidario.docx"
        );
    }
}
